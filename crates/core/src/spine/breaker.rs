//! Circuit breaker
//!
//! One breaker per external dependency. Closed admits all calls; enough
//! failures inside the window open it; after the recovery timeout it
//! half-opens and admits a bounded number of probes. An open breaker can
//! only close again by traversing half-open.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Failures within `window` that open the breaker.
    pub failure_threshold: u32,
    pub window_secs: u64,
    /// How long the breaker stays open before probing.
    pub recovery_timeout_secs: u64,
    /// Probes admitted while half-open.
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            window_secs: 60,
            recovery_timeout_secs: 30,
            half_open_max_calls: 3,
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    /// Failure timestamps inside the rolling window.
    failures: Vec<Instant>,
    opened_at: Option<Instant>,
    half_open_calls: u32,
    half_open_successes: u32,
}

/// Per-dependency breaker guarded by a mutex; every transition is a short
/// critical section, so it cannot deadlock across dependencies.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failures: Vec::new(),
                opened_at: None,
                half_open_calls: 0,
                half_open_successes: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock();
        self.advance(&mut inner);
        inner.state
    }

    /// Whether a call may proceed right now. Half-open admits a bounded
    /// number of probes; open admits nothing until the recovery timeout.
    pub fn allow(&self) -> bool {
        let mut inner = self.inner.lock();
        self.advance(&mut inner);
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => false,
            BreakerState::HalfOpen => {
                if inner.half_open_calls < self.config.half_open_max_calls {
                    inner.half_open_calls += 1;
                    true
                } else {
                    false
                }
            },
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::HalfOpen => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.half_open_max_calls {
                    tracing::info!(breaker = %self.name, "circuit breaker closing after probes");
                    inner.state = BreakerState::Closed;
                    inner.failures.clear();
                    inner.opened_at = None;
                    inner.half_open_calls = 0;
                    inner.half_open_successes = 0;
                }
            },
            BreakerState::Closed => {
                inner.failures.clear();
            },
            BreakerState::Open => {},
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::HalfOpen => {
                // A failed probe re-opens immediately.
                tracing::warn!(breaker = %self.name, "probe failed, circuit breaker re-opening");
                self.open(&mut inner);
            },
            BreakerState::Closed => {
                let now = Instant::now();
                let window = Duration::from_secs(self.config.window_secs);
                inner.failures.retain(|t| now.duration_since(*t) <= window);
                inner.failures.push(now);
                if inner.failures.len() as u32 >= self.config.failure_threshold {
                    tracing::warn!(
                        breaker = %self.name,
                        failures = inner.failures.len(),
                        "failure threshold reached, circuit breaker opening"
                    );
                    self.open(&mut inner);
                }
            },
            BreakerState::Open => {},
        }
    }

    fn open(&self, inner: &mut BreakerInner) {
        inner.state = BreakerState::Open;
        inner.opened_at = Some(Instant::now());
        inner.half_open_calls = 0;
        inner.half_open_successes = 0;
        metrics::counter!("router_breaker_open_total", "dependency" => self.name.clone())
            .increment(1);
    }

    /// Open -> half-open once the recovery timeout has elapsed.
    fn advance(&self, inner: &mut BreakerInner) {
        if inner.state == BreakerState::Open {
            let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
            if elapsed >= Duration::from_secs(self.config.recovery_timeout_secs) {
                tracing::info!(breaker = %self.name, "circuit breaker half-open, admitting probes");
                inner.state = BreakerState::HalfOpen;
                inner.half_open_calls = 0;
                inner.half_open_successes = 0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(recovery_secs: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            "nlu",
            CircuitBreakerConfig {
                failure_threshold: 3,
                window_secs: 60,
                recovery_timeout_secs: recovery_secs,
                half_open_max_calls: 2,
            },
        )
    }

    #[test]
    fn test_opens_at_threshold() {
        let b = breaker(30);
        assert_eq!(b.state(), BreakerState::Closed);
        b.record_failure();
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Closed);
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Open);
        assert!(!b.allow());
    }

    #[test]
    fn test_success_resets_window() {
        let b = breaker(30);
        b.record_failure();
        b.record_failure();
        b.record_success();
        b.record_failure();
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[test]
    fn test_half_open_probe_cycle() {
        let b = breaker(0);
        for _ in 0..3 {
            b.record_failure();
        }
        // Zero recovery timeout: next inspection goes half-open.
        assert_eq!(b.state(), BreakerState::HalfOpen);

        // Bounded probes.
        assert!(b.allow());
        assert!(b.allow());
        assert!(!b.allow());

        b.record_success();
        assert_eq!(b.state(), BreakerState::HalfOpen);
        b.record_success();
        assert_eq!(b.state(), BreakerState::Closed);
        assert!(b.allow());
    }

    #[test]
    fn test_failed_probe_reopens() {
        let b = breaker(0);
        for _ in 0..3 {
            b.record_failure();
        }
        assert_eq!(b.state(), BreakerState::HalfOpen);
        assert!(b.allow());
        b.record_failure();
        // Re-opened; with zero recovery timeout the next inspection is
        // half-open again, but it can never jump straight to closed.
        let state = b.state();
        assert_ne!(state, BreakerState::Closed);
    }
}
