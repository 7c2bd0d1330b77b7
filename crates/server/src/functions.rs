//! Function-call backend adapters
//!
//! [`HttpFunctionExecutor`] posts to the business API; [`CannedExecutor`]
//! serves development and tests with deterministic results.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

use task_router_core::{Error, ErrorCode, FunctionExecutor, FunctionOutcome, Result};

/// Production adapter: `POST {base}/{function_name}` with the slot map.
pub struct HttpFunctionExecutor {
    client: reqwest::Client,
    base_url: String,
}

impl HttpFunctionExecutor {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl FunctionExecutor for HttpFunctionExecutor {
    async fn call(
        &self,
        function_name: &str,
        slots: &HashMap<String, String>,
        deadline: Duration,
    ) -> Result<FunctionOutcome> {
        let url = format!("{}/{function_name}", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .timeout(deadline)
            .json(slots)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::new(ErrorCode::ExternalTimeout, format!("function '{function_name}' timed out"))
                } else {
                    Error::new(ErrorCode::ApiCallFailed, format!("function call failed: {e}"))
                }
            })?;

        let status = response.status();
        if status.is_server_error() {
            // 5xx responses are worth one retry; 4xx business errors are
            // not.
            return Ok(FunctionOutcome {
                success: false,
                message: None,
                data: None,
                error: Some(format!("backend returned {status}")),
                transient: true,
            });
        }

        let outcome: FunctionOutcome = response.json().await.map_err(|e| {
            Error::new(ErrorCode::ApiCallFailed, format!("malformed function result: {e}"))
        })?;
        Ok(outcome)
    }

    fn name(&self) -> &str {
        "http_functions"
    }
}

/// Development executor with canned per-function results.
#[derive(Default)]
pub struct CannedExecutor;

#[async_trait]
impl FunctionExecutor for CannedExecutor {
    async fn call(
        &self,
        function_name: &str,
        slots: &HashMap<String, String>,
        _deadline: Duration,
    ) -> Result<FunctionOutcome> {
        let data = match function_name {
            "flight_booking" => serde_json::json!({
                "order_id": format!("FL-{:04}", slots.len() * 256),
                "departure_city": slots.get("departure_city"),
                "arrival_city": slots.get("arrival_city"),
            }),
            "train_booking" => serde_json::json!({ "order_id": "TR-0001" }),
            "movie_booking" => serde_json::json!({ "order_id": "MV-0001" }),
            "balance_inquiry" => serde_json::json!({ "balance": "8888.00" }),
            other => {
                return Ok(FunctionOutcome {
                    success: false,
                    message: None,
                    data: None,
                    error: Some(format!("未知业务功能：{other}")),
                    transient: false,
                })
            },
        };
        Ok(FunctionOutcome {
            success: true,
            message: None,
            data: Some(data),
            error: None,
            transient: false,
        })
    }

    fn name(&self) -> &str {
        "canned_functions"
    }
}
