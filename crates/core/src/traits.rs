//! Collaborator traits
//!
//! The four external seams of the router: NLU, function execution, session
//! storage, and the cache. All are object-safe async traits; any conforming
//! implementation may be substituted.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::Result;
use crate::session::{Session, TurnRecord, UserProfile};

/// One candidate intent from classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentCandidate {
    pub name: String,
    pub confidence: f32,
}

impl IntentCandidate {
    pub fn new(name: impl Into<String>, confidence: f32) -> Self {
        Self {
            name: name.into(),
            confidence,
        }
    }
}

/// One slot extraction from the utterance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedSlot {
    pub extracted: String,
    pub raw_text: String,
    pub confidence: f32,
}

/// Compact per-turn context handed to the NLU backend: enough of the
/// session snapshot to bias classification, plus the catalog generation
/// the candidates must come from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NluContext {
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_intent: Option<String>,
    pub turn_count: u32,
    pub catalog_digest: String,
}

/// Structured NLU result for one utterance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NluOutput {
    /// Ranked candidates, highest confidence first.
    pub candidates: Vec<IntentCandidate>,
    pub slots: HashMap<String, ExtractedSlot>,
}

impl NluOutput {
    pub fn top(&self) -> Option<&IntentCandidate> {
        self.candidates.first()
    }

    pub fn sort(&mut self) {
        self.candidates
            .sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal));
    }
}

/// External NLU backend. Stateless across calls; all context passes
/// through arguments.
#[async_trait]
pub trait Nlu: Send + Sync {
    /// Classify one utterance against the published catalog generation.
    /// Implementations must respect the hard deadline.
    async fn classify(&self, utterance: &str, context: &NluContext) -> Result<NluOutput>;

    /// Backend name for health reporting.
    fn name(&self) -> &str;
}

/// Result of a dispatched function call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FunctionOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set by the executor when the failure is worth one retry.
    #[serde(default)]
    pub transient: bool,
}

/// External function-call backend executing business actions.
#[async_trait]
pub trait FunctionExecutor: Send + Sync {
    async fn call(
        &self,
        function_name: &str,
        slots: &HashMap<String, String>,
        deadline: Duration,
    ) -> Result<FunctionOutcome>;

    fn name(&self) -> &str;
}

/// Authoritative session/turn persistence.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get_session(&self, session_id: &str) -> Result<Option<Session>>;

    async fn put_session(&self, session: &Session) -> Result<()>;

    /// Append-only; turns are persisted before the in-session ring is
    /// updated.
    async fn append_turn(&self, session_id: &str, turn: &TurnRecord) -> Result<()>;

    async fn get_profile(&self, user_id: &str) -> Result<Option<UserProfile>>;

    async fn put_profile(&self, profile: &UserProfile) -> Result<()>;

    async fn delete_session(&self, session_id: &str) -> Result<()>;

    fn name(&self) -> &str;
}

/// KV cache with TTL. Live sessions are cached here; the store stays
/// authoritative.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    async fn del(&self, key: &str) -> Result<()>;

    /// Evict entries past their TTL; returns how many were removed.
    async fn clear_expired(&self) -> Result<usize>;

    /// Shed low-priority entries under memory pressure; returns how many
    /// were removed.
    async fn clear_low_priority(&self) -> Result<usize>;

    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nlu_output_sort_and_top() {
        let mut output = NluOutput {
            candidates: vec![
                IntentCandidate::new("book_train", 0.55),
                IntentCandidate::new("book_flight", 0.82),
            ],
            slots: HashMap::new(),
        };
        output.sort();
        assert_eq!(output.top().unwrap().name, "book_flight");
    }

    #[test]
    fn test_function_outcome_serde() {
        let outcome = FunctionOutcome {
            success: true,
            message: Some("已为您预订".to_string()),
            data: Some(serde_json::json!({"order_id": "FL-1024"})),
            error: None,
            transient: false,
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["data"]["order_id"], "FL-1024");
        assert!(json.get("error").is_none());
    }
}
