//! Dialogue orchestration engine
//!
//! The state machine that drives a conversation from raw utterance to
//! dispatched function call:
//! - intent resolution (confident / ambiguous / unknown / continuation)
//! - slot inheritance from session, history and profile
//! - per-intent dependency graphs with cycle detection
//! - slot normalization and validation
//! - question generation and follow-up analysis
//! - function dispatch
//!
//! [`TurnEngine`] wires these together for one turn; the transport layer
//! owns sessions and the response envelope.

pub mod dispatch;
pub mod followup;
pub mod graph;
pub mod inheritance;
pub mod normalize;
pub mod orchestrator;
pub mod question;
pub mod resolver;
pub mod transforms;
pub mod validate;

pub use dispatch::{DispatchReply, Dispatcher};
pub use followup::{
    classify, counts_as_failure, follow_up_kind, track_failure, FollowUpKind, RecoveryAction,
    ReplySignals, ResponseClass,
};
pub use graph::{GraphCache, GraphValidation, IntentGraph, MutexConflict};
pub use inheritance::{InheritanceEngine, InheritanceOutcome};
pub use orchestrator::{
    AmbiguousIntent, ReplyStatus, ResponseKind, TurnEngine, TurnOutcome,
};
pub use question::{
    select_strategy, ContextStrategy, GeneratedQuestion, QuestionGenerator, QuestionStyle,
    StrategyFeatures,
};
pub use resolver::{IntentResolver, Resolution, ResolverConfig};
