//! Fault-handling spine
//!
//! Cross-cutting resilience primitives invoked explicitly at call sites:
//! retry with capped exponential backoff, per-dependency circuit breakers,
//! and the windowed error monitor behind alerting.

mod breaker;
mod monitor;
mod retry;

pub use breaker::{BreakerState, CircuitBreaker, CircuitBreakerConfig};
pub use monitor::{AlertRule, ErrorMonitor, ErrorStats};
pub use retry::{RetryConfig, RetryPolicy};
