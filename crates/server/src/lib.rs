//! Task Router Server
//!
//! HTTP transport around the dialogue engine: the chat endpoint, the
//! response envelope with its legacy field names, per-session turn
//! serialization, rate limiting, health and admin surfaces.

pub mod envelope;
pub mod functions;
pub mod http;
pub mod rate_limit;
pub mod session;
pub mod state;

pub use envelope::{ApiResponse, ChatData, ChatRequest, ErrorEnvelope, SlotInfo};
pub use functions::{CannedExecutor, HttpFunctionExecutor};
pub use http::create_router;
pub use rate_limit::RateLimiter;
pub use session::SessionManager;
pub use state::AppState;
