//! Breaker-guarded NLU
//!
//! Wraps the primary adapter with the per-dependency circuit breaker.
//! While the breaker is open (or a call fails through it), classification
//! degrades to the keyword fallback instead of failing the turn.

use async_trait::async_trait;
use std::sync::Arc;

use task_router_core::{BreakerState, CircuitBreaker, Nlu, NluContext, NluOutput, Result};

pub struct ResilientNlu {
    primary: Arc<dyn Nlu>,
    fallback: Arc<dyn Nlu>,
    breaker: Arc<CircuitBreaker>,
}

impl ResilientNlu {
    pub fn new(primary: Arc<dyn Nlu>, fallback: Arc<dyn Nlu>, breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            primary,
            fallback,
            breaker,
        }
    }

    pub fn breaker_state(&self) -> BreakerState {
        self.breaker.state()
    }
}

#[async_trait]
impl Nlu for ResilientNlu {
    async fn classify(&self, utterance: &str, context: &NluContext) -> Result<NluOutput> {
        if !self.breaker.allow() {
            tracing::debug!(breaker = self.breaker.name(), "breaker open, using fallback nlu");
            metrics::counter!("router_nlu_fallback_total").increment(1);
            return self.fallback.classify(utterance, context).await;
        }

        match self.primary.classify(utterance, context).await {
            Ok(output) => {
                self.breaker.record_success();
                Ok(output)
            },
            Err(err) => {
                self.breaker.record_failure();
                tracing::warn!(
                    code = %err.code(),
                    breaker = self.breaker.name(),
                    "primary nlu failed, degrading to fallback"
                );
                err.record();
                metrics::counter!("router_nlu_fallback_total").increment(1);
                self.fallback.classify(utterance, context).await
            },
        }
    }

    fn name(&self) -> &str {
        "resilient_nlu"
    }
}
