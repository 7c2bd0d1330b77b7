//! HTTP NLU adapter

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use task_router_core::{Error, ErrorCode, Nlu, NluContext, NluOutput, Result};

#[derive(Debug, Clone)]
pub struct HttpNluConfig {
    pub endpoint: String,
    /// Hard deadline for the whole classify call, retry included.
    pub timeout: Duration,
}

impl Default for HttpNluConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:9100/classify".to_string(),
            timeout: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Serialize)]
struct ClassifyRequest<'a> {
    utterance: &'a str,
    context: &'a NluContext,
}

#[derive(Debug, Deserialize)]
struct ClassifyResponse {
    #[serde(flatten)]
    output: NluOutput,
}

/// Adapter for the external NLU service. Stateless across calls; all
/// context passes through arguments.
pub struct HttpNlu {
    client: reqwest::Client,
    config: HttpNluConfig,
}

impl HttpNlu {
    pub fn new(config: HttpNluConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();
        Self { client, config }
    }

    async fn call_once(&self, utterance: &str, context: &NluContext) -> Result<NluOutput> {
        let request = ClassifyRequest { utterance, context };
        let response = self
            .client
            .post(&self.config.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::new(ErrorCode::ExternalTimeout, "nlu classify timed out")
                } else if e.is_connect() {
                    Error::new(ErrorCode::Network, format!("nlu unreachable: {e}"))
                } else {
                    Error::new(ErrorCode::ApiCallFailed, format!("nlu request failed: {e}"))
                }
                .with_context("endpoint", self.config.endpoint.clone())
            })?;

        if !response.status().is_success() {
            return Err(Error::new(
                ErrorCode::ApiCallFailed,
                format!("nlu returned status {}", response.status()),
            )
            .with_context("status", response.status().as_u16()));
        }

        let parsed: ClassifyResponse = response.json().await.map_err(|e| {
            Error::new(ErrorCode::ApiCallFailed, format!("nlu response malformed: {e}"))
        })?;
        let mut output = parsed.output;
        output.sort();
        Ok(output)
    }
}

#[async_trait]
impl Nlu for HttpNlu {
    /// One call with one transport-level retry, both inside the hard
    /// deadline; a timeout surfaces as `E5002` without retrying.
    async fn classify(&self, utterance: &str, context: &NluContext) -> Result<NluOutput> {
        let started = std::time::Instant::now();
        match self.call_once(utterance, context).await {
            Ok(output) => Ok(output),
            Err(err) if err.code() == ErrorCode::ExternalTimeout => Err(err),
            Err(err) => {
                let remaining = self.config.timeout.saturating_sub(started.elapsed());
                if remaining < Duration::from_millis(100) {
                    return Err(err);
                }
                tracing::warn!(code = %err.code(), "nlu transport failure, retrying once");
                tokio::time::sleep(Duration::from_millis(50)).await;
                self.call_once(utterance, context).await
            },
        }
    }

    fn name(&self) -> &str {
        "http_nlu"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> NluContext {
        NluContext {
            session_id: "s1".to_string(),
            current_intent: None,
            turn_count: 0,
            catalog_digest: "catalog-v1-4".to_string(),
        }
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_maps_to_network_error() {
        let nlu = HttpNlu::new(HttpNluConfig {
            endpoint: "http://127.0.0.1:1/classify".to_string(),
            timeout: Duration::from_millis(300),
        });
        let err = nlu.classify("查询余额", &context()).await.unwrap_err();
        assert!(matches!(
            err.code(),
            ErrorCode::Network | ErrorCode::ExternalTimeout | ErrorCode::ApiCallFailed
        ));
    }

    #[test]
    fn test_request_shape() {
        let ctx = context();
        let request = ClassifyRequest {
            utterance: "我想订机票",
            context: &ctx,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["utterance"], "我想订机票");
        assert_eq!(json["context"]["catalog_digest"], "catalog-v1-4");
        assert_eq!(json["context"]["session_id"], "s1");
    }
}
