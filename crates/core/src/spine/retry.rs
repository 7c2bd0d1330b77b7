//! Retry policy
//!
//! Retries are reserved for idempotent operations failing with a retryable
//! code (external service, transient storage, network). Backoff is
//! exponential with jitter and capped.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts beyond the first call.
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 1,
            initial_backoff_ms: 100,
            max_backoff_ms: 2_000,
            multiplier: 2.0,
        }
    }
}

/// Applies a [`RetryConfig`] to async operations.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Backoff before attempt `n` (1-based), with up to 25% jitter.
    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.config.initial_backoff_ms as f64
            * self.config.multiplier.powi(attempt.saturating_sub(1) as i32);
        let capped = base.min(self.config.max_backoff_ms as f64);
        let jitter = rand::thread_rng().gen_range(0.0..=0.25);
        Duration::from_millis((capped * (1.0 + jitter)) as u64)
    }

    /// Run `op`, retrying on retryable error codes. The operation must be
    /// idempotent; callers guard that.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.config.max_retries && err.code().is_retryable() => {
                    attempt += 1;
                    let delay = self.backoff(attempt);
                    tracing::warn!(
                        operation = label,
                        code = %err.code(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "retrying after transient failure"
                    );
                    metrics::counter!("router_retries_total", "operation" => label.to_string())
                        .increment(1);
                    tokio::time::sleep(delay).await;
                },
                Err(err) => return Err(self.annotate(err, attempt)),
            }
        }
    }

    fn annotate(&self, err: Error, attempts: u32) -> Error {
        if attempts > 0 {
            err.with_context("retry_attempts", attempts)
        } else {
            err
        }
    }
}
