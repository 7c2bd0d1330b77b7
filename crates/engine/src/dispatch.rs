//! Function dispatch
//!
//! Invoked once the intent's slot set is complete and valid: gathers the
//! normalized slot map, calls the function executor under its deadline,
//! retries once only for failures the executor marks transient, and
//! renders the reply.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use task_router_core::{
    Error, ErrorCode, FunctionExecutor, FunctionOutcome, IntentDef, Result, SlotMap,
};

/// A rendered successful dispatch.
#[derive(Debug, Clone)]
pub struct DispatchReply {
    pub text: String,
    pub api_result: Option<serde_json::Value>,
}

pub struct Dispatcher {
    executor: Arc<dyn FunctionExecutor>,
    deadline: Duration,
}

impl Dispatcher {
    pub fn new(executor: Arc<dyn FunctionExecutor>, deadline: Duration) -> Self {
        Self { executor, deadline }
    }

    /// Call the intent's function with the collected slots. Errors leave
    /// the intent in place so the session can resume after the user sees
    /// the fallback reply.
    pub async fn dispatch(&self, intent: &IntentDef, slots: &SlotMap) -> Result<DispatchReply> {
        let arguments: HashMap<String, String> = slots.valid_values().into_iter().collect();
        tracing::info!(
            intent = %intent.name,
            function = %intent.function_name,
            slot_count = arguments.len(),
            "dispatching function call"
        );

        let outcome = self.call_with_transient_retry(intent, &arguments).await?;
        if !outcome.success {
            let message = outcome
                .error
                .unwrap_or_else(|| "function returned failure".to_string());
            return Err(Error::new(ErrorCode::ApiCallFailed, message)
                .with_context("function", intent.function_name.clone()));
        }

        metrics::counter!("router_dispatch_total", "intent" => intent.name.clone()).increment(1);
        Ok(DispatchReply {
            text: render_reply(intent, &outcome, &arguments),
            api_result: outcome.data,
        })
    }

    async fn call_with_transient_retry(
        &self,
        intent: &IntentDef,
        arguments: &HashMap<String, String>,
    ) -> Result<FunctionOutcome> {
        let first = self.call_once(intent, arguments).await?;
        if first.success || !first.transient {
            return Ok(first);
        }
        tracing::warn!(
            function = %intent.function_name,
            "transient function failure, retrying once"
        );
        self.call_once(intent, arguments).await
    }

    async fn call_once(
        &self,
        intent: &IntentDef,
        arguments: &HashMap<String, String>,
    ) -> Result<FunctionOutcome> {
        match tokio::time::timeout(
            self.deadline,
            self.executor.call(&intent.function_name, arguments, self.deadline),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(Error::new(
                ErrorCode::ExternalTimeout,
                format!("function '{}' exceeded deadline", intent.function_name),
            )
            .with_context("deadline_ms", self.deadline.as_millis() as u64)),
        }
    }
}

/// Prefer the executor's message; otherwise expand the intent's reply
/// template over `result.data` and the sent slots; otherwise a generic
/// completion.
fn render_reply(
    intent: &IntentDef,
    outcome: &FunctionOutcome,
    arguments: &HashMap<String, String>,
) -> String {
    if let Some(message) = outcome.message.as_deref() {
        if !message.is_empty() {
            return message.to_string();
        }
    }

    if let Some(template) = intent.reply_template.as_deref() {
        let mut text = template.to_string();
        if let Some(serde_json::Value::Object(data)) = outcome.data.as_ref() {
            for (key, value) in data {
                let replacement = match value {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                text = text.replace(&format!("{{{key}}}"), &replacement);
            }
        }
        for (key, value) in arguments {
            text = text.replace(&format!("{{{key}}}"), value);
        }
        if !text.contains('{') {
            return text;
        }
        // Unexpanded placeholders mean the template did not fit the
        // result; fall through to the generic reply.
        tracing::debug!(intent = %intent.name, "reply template left unexpanded placeholders");
    }

    format!("{}已完成。", intent.display_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use task_router_core::{NormalizedValue, SlotValue};

    fn intent(template: Option<&str>) -> IntentDef {
        IntentDef {
            name: "book_flight".to_string(),
            display_name: "订机票".to_string(),
            description: None,
            confidence_threshold: 0.7,
            slots: Vec::new(),
            dependencies: Vec::new(),
            inheritance: Vec::new(),
            examples: Vec::new(),
            function_name: "flight_booking".to_string(),
            reply_template: template.map(str::to_string),
        }
    }

    fn slots() -> SlotMap {
        let mut map = SlotMap::new();
        for (name, text) in [
            ("departure_city", "北京"),
            ("arrival_city", "上海"),
            ("departure_date", "2026-08-02"),
        ] {
            let mut value = SlotValue::extracted(name, text, 0.9);
            value.set_valid(NormalizedValue::Text(text.to_string()));
            map.insert(value);
        }
        map
    }

    struct ScriptedExecutor {
        calls: AtomicU32,
        outcomes: Vec<FunctionOutcome>,
    }

    #[async_trait]
    impl FunctionExecutor for ScriptedExecutor {
        async fn call(
            &self,
            _function_name: &str,
            _slots: &HashMap<String, String>,
            _deadline: Duration,
        ) -> Result<FunctionOutcome> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            Ok(self.outcomes[n.min(self.outcomes.len() - 1)].clone())
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn success_with(order_id: &str) -> FunctionOutcome {
        FunctionOutcome {
            success: true,
            message: None,
            data: Some(serde_json::json!({ "order_id": order_id })),
            error: None,
            transient: false,
        }
    }

    #[tokio::test]
    async fn test_template_rendering_over_data_and_slots() {
        let executor = Arc::new(ScriptedExecutor {
            calls: AtomicU32::new(0),
            outcomes: vec![success_with("FL-1024")],
        });
        let dispatcher = Dispatcher::new(executor, Duration::from_secs(1));
        let intent = intent(Some(
            "已为您预订{departure_date}从{departure_city}到{arrival_city}的机票，订单号{order_id}。",
        ));

        let reply = dispatcher.dispatch(&intent, &slots()).await.unwrap();
        assert_eq!(
            reply.text,
            "已为您预订2026-08-02从北京到上海的机票，订单号FL-1024。"
        );
        assert_eq!(reply.api_result.unwrap()["order_id"], "FL-1024");
    }

    #[tokio::test]
    async fn test_message_preferred_over_template() {
        let executor = Arc::new(ScriptedExecutor {
            calls: AtomicU32::new(0),
            outcomes: vec![FunctionOutcome {
                success: true,
                message: Some("预订成功！".to_string()),
                data: None,
                error: None,
                transient: false,
            }],
        });
        let dispatcher = Dispatcher::new(executor, Duration::from_secs(1));
        let reply = dispatcher
            .dispatch(&intent(Some("忽略{order_id}")), &slots())
            .await
            .unwrap();
        assert_eq!(reply.text, "预订成功！");
    }

    #[tokio::test]
    async fn test_transient_failure_retried_once() {
        let executor = Arc::new(ScriptedExecutor {
            calls: AtomicU32::new(0),
            outcomes: vec![
                FunctionOutcome {
                    success: false,
                    message: None,
                    data: None,
                    error: Some("temporarily unavailable".to_string()),
                    transient: true,
                },
                success_with("FL-2048"),
            ],
        });
        let dispatcher = Dispatcher::new(executor.clone(), Duration::from_secs(1));
        let reply = dispatcher.dispatch(&intent(None), &slots()).await.unwrap();
        assert!(reply.text.contains("订机票"));
        assert_eq!(executor.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_business_failure_not_retried() {
        let executor = Arc::new(ScriptedExecutor {
            calls: AtomicU32::new(0),
            outcomes: vec![FunctionOutcome {
                success: false,
                message: None,
                data: None,
                error: Some("无可用航班".to_string()),
                transient: false,
            }],
        });
        let dispatcher = Dispatcher::new(executor.clone(), Duration::from_secs(1));
        let err = dispatcher.dispatch(&intent(None), &slots()).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ApiCallFailed);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
    }

    struct HangingExecutor;

    #[async_trait]
    impl FunctionExecutor for HangingExecutor {
        async fn call(
            &self,
            _function_name: &str,
            _slots: &HashMap<String, String>,
            _deadline: Duration,
        ) -> Result<FunctionOutcome> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(FunctionOutcome::default())
        }

        fn name(&self) -> &str {
            "hanging"
        }
    }

    #[tokio::test]
    async fn test_deadline_maps_to_external_timeout() {
        let dispatcher = Dispatcher::new(Arc::new(HangingExecutor), Duration::from_millis(20));
        let err = dispatcher.dispatch(&intent(None), &slots()).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ExternalTimeout);
    }
}
