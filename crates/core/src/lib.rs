//! Core traits and types for the task router
//!
//! This crate provides foundational types used across all other crates:
//! - The error taxonomy (ENNNN codes) and `ErrorDetail`
//! - Intent catalog types (intents, slot definitions, dependencies, rules)
//! - Slot value and session types
//! - Collaborator traits for pluggable backends (NLU, function executor,
//!   store, cache)
//! - Resilience primitives (retry policy, circuit breaker, error monitor)

pub mod catalog;
pub mod error;
pub mod session;
pub mod slots;
pub mod spine;
pub mod traits;

pub use catalog::{
    Catalog, CatalogHandle, DependencyEdge, DependencyKind, EdgeCondition, InheritSource,
    InheritStrategy, InheritanceRule, IntentDef, QuestionKind, SlotDef, SlotKind, SlotValidation,
};
pub use error::{
    Error, ErrorCategory, ErrorCode, ErrorDetail, ErrorSeverity, Result,
};
pub use session::{
    InboundContext, IntentFrame, Session, SessionState, TurnRecord, TurnStatus, UserProfile,
    HISTORY_RING_CAPACITY,
};
pub use slots::{NormalizedValue, SlotMap, SlotSource, SlotState, SlotValue};
pub use spine::{
    AlertRule, BreakerState, CircuitBreaker, CircuitBreakerConfig, ErrorMonitor, ErrorStats,
    RetryConfig, RetryPolicy,
};
pub use traits::{
    Cache, ExtractedSlot, FunctionExecutor, FunctionOutcome, IntentCandidate, Nlu, NluContext,
    NluOutput, SessionStore,
};
