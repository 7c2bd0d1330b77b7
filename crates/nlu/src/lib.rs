//! NLU adapters
//!
//! One outbound call per turn to the external NLU, behind the [`Nlu`]
//! trait from core:
//! - [`HttpNlu`]: the production adapter with a hard deadline and one backoff
//!   retry inside it
//! - [`KeywordNlu`]: degraded fallback matching intent examples
//! - [`ResilientNlu`]: breaker-guarded primary with fallback delegation
//!
//! [`Nlu`]: task_router_core::Nlu

mod fallback;
mod http;
mod resilient;

pub use fallback::KeywordNlu;
pub use http::{HttpNlu, HttpNluConfig};
pub use resilient::ResilientNlu;
