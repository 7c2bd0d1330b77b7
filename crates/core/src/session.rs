//! Session and turn types
//!
//! A session is one user's dialogue thread. It owns the slot table for the
//! intent in flight, a bounded ring of recent turns, and a bounded stack of
//! suspended intents. Exactly one turn mutates a session at a time; the
//! session manager enforces that.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

use crate::slots::SlotMap;

/// Turns kept in the in-session history ring.
pub const HISTORY_RING_CAPACITY: usize = 20;

/// Suspended intents kept when the user switches goals mid-flight.
pub const INTENT_STACK_CAPACITY: usize = 4;

/// Dialogue phase of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No intent in flight.
    #[default]
    Active,
    /// Gathering slots for the current intent.
    Collecting,
    /// Waiting on a disambiguation or clarification answer.
    Clarifying,
    /// Waiting on the user to confirm inferred values.
    Confirming,
    /// Repeated failures on a slot; offering alternatives or hand-off.
    Recovering,
    Closed,
}

/// Outcome status of a processed turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Completed,
    Incomplete,
    Ambiguous,
    ValidationError,
    ApiError,
    Delegated,
    Failed,
}

/// One user-input / system-reply pair, ring-buffered on the session and
/// persisted append-only by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub turn_index: u32,
    pub user_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recognized_intent: Option<String>,
    pub confidence: f32,
    /// Copy of the slot table as of the end of the turn.
    pub slots_snapshot: SlotMap,
    pub reply_text: String,
    pub reply_kind: String,
    pub status: TurnStatus,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// A suspended intent on the stack: the intent name plus the slots it had
/// collected when it was pushed aside.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentFrame {
    pub intent: String,
    pub slots: SlotMap,
    pub suspended_at: DateTime<Utc>,
}

/// Transient per-request overlay carried in the chat request's `context`.
/// Merged over session state for the duration of one turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InboundContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_platform: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_system_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_trace_id: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub business_context: HashMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub temp_preferences: HashMap<String, serde_json::Value>,
}

impl InboundContext {
    pub fn is_empty(&self) -> bool {
        self.device_platform.is_none()
            && self.user_agent.is_none()
            && self.ip_address.is_none()
            && self.language.is_none()
            && self.location.is_none()
            && self.client_system_id.is_none()
            && self.request_trace_id.is_none()
            && self.business_context.is_empty()
            && self.temp_preferences.is_empty()
    }
}

/// Stored user profile used by slot inheritance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    /// slot-name -> remembered value (e.g. home city, phone number).
    #[serde(default)]
    pub preferences: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// A user's dialogue thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub state: SessionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_intent: Option<String>,
    pub intent_stack: Vec<IntentFrame>,
    pub collected_slots: SlotMap,
    /// Values parked with errors (e.g. MUTEX losers), keyed by slot name.
    #[serde(default)]
    pub partial_slots: HashMap<String, String>,
    /// Consecutive failed attempts per slot.
    #[serde(default)]
    pub failed_attempts: HashMap<String, u32>,
    pub history_ring: VecDeque<TurnRecord>,
    pub turn_count: u32,
    /// Slot the last emitted question targeted, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_slot: Option<String>,
    /// Candidate intents offered by the last disambiguation prompt.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pending_disambiguation: Vec<String>,
    /// Recently asked questions, for the repetition penalty.
    #[serde(default)]
    pub recent_questions: VecDeque<String>,
    pub time_pressure: f32,
    pub engagement: f32,
}

impl Session {
    pub fn new(session_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            created_at: now,
            last_seen_at: now,
            state: SessionState::Active,
            current_intent: None,
            intent_stack: Vec::new(),
            collected_slots: SlotMap::new(),
            partial_slots: HashMap::new(),
            failed_attempts: HashMap::new(),
            history_ring: VecDeque::with_capacity(HISTORY_RING_CAPACITY),
            turn_count: 0,
            pending_slot: None,
            pending_disambiguation: Vec::new(),
            recent_questions: VecDeque::new(),
            time_pressure: 0.3,
            engagement: 0.7,
        }
    }

    pub fn touch(&mut self) {
        self.last_seen_at = Utc::now();
    }

    /// Suspend the intent in flight onto the bounded stack; pushing past
    /// the bound drops the oldest suspension.
    fn suspend_current(&mut self) {
        if let Some(current) = self.current_intent.take() {
            if self.intent_stack.len() >= INTENT_STACK_CAPACITY {
                let dropped = self.intent_stack.remove(0);
                tracing::warn!(
                    session_id = %self.session_id,
                    dropped_intent = %dropped.intent,
                    "intent stack full, dropping oldest suspended intent"
                );
            }
            self.intent_stack.push(IntentFrame {
                intent: current,
                slots: std::mem::take(&mut self.collected_slots),
                suspended_at: Utc::now(),
            });
        }
    }

    /// Begin collecting a new intent, suspending any intent in flight.
    pub fn begin_intent(&mut self, intent: impl Into<String>) {
        let intent = intent.into();
        self.suspend_current();
        self.current_intent = Some(intent);
        self.collected_slots = SlotMap::new();
        self.partial_slots.clear();
        self.failed_attempts.clear();
        self.pending_slot = None;
        self.state = SessionState::Collecting;
    }

    /// Save the current intent's progress and return to idle; the next
    /// completed intent (or an explicit resume) pops it back.
    pub fn postpone_intent(&mut self) -> Option<String> {
        let postponed = self.current_intent.clone();
        self.suspend_current();
        self.collected_slots = SlotMap::new();
        self.partial_slots.clear();
        self.failed_attempts.clear();
        self.pending_slot = None;
        self.state = SessionState::Active;
        postponed
    }

    /// Finish the current intent; resume the most recently suspended one
    /// if any. Returns the resumed intent name.
    pub fn complete_intent(&mut self) -> Option<String> {
        self.current_intent = None;
        self.collected_slots.clear();
        self.partial_slots.clear();
        self.failed_attempts.clear();
        self.pending_slot = None;
        match self.intent_stack.pop() {
            Some(frame) => {
                self.current_intent = Some(frame.intent.clone());
                self.collected_slots = frame.slots;
                self.state = SessionState::Collecting;
                Some(frame.intent)
            },
            None => {
                self.state = SessionState::Active;
                None
            },
        }
    }

    /// Drop the current intent without resuming anything.
    pub fn cancel_intent(&mut self) {
        self.current_intent = None;
        self.collected_slots.clear();
        self.partial_slots.clear();
        self.failed_attempts.clear();
        self.pending_slot = None;
        self.state = SessionState::Active;
    }

    pub fn record_failed_attempt(&mut self, slot_name: &str) -> u32 {
        let count = self.failed_attempts.entry(slot_name.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn clear_failed_attempts(&mut self, slot_name: &str) {
        self.failed_attempts.remove(slot_name);
    }

    /// Append a completed turn to the ring, evicting the oldest past
    /// capacity. Called only after persistence for the turn succeeded.
    pub fn push_turn(&mut self, turn: TurnRecord) {
        if self.history_ring.len() >= HISTORY_RING_CAPACITY {
            self.history_ring.pop_front();
        }
        self.history_ring.push_back(turn);
        self.turn_count += 1;
    }

    pub fn last_turn(&self) -> Option<&TurnRecord> {
        self.history_ring.back()
    }

    /// Track an emitted question for the repetition penalty ring.
    pub fn remember_question(&mut self, question: impl Into<String>) {
        if self.recent_questions.len() >= HISTORY_RING_CAPACITY {
            self.recent_questions.pop_front();
        }
        self.recent_questions.push_back(question.into());
    }

    pub fn is_expired(&self, ttl: chrono::Duration) -> bool {
        Utc::now() - self.last_seen_at > ttl
    }

    /// Completion rate over the current intent's required slots, used by
    /// question strategy selection. 0.0 when no intent is in flight.
    pub fn completion_rate(&self, required: &[&str]) -> f32 {
        if required.is_empty() {
            return 1.0;
        }
        let filled = required
            .iter()
            .filter(|name| self.collected_slots.get(name).map(|v| v.is_valid()).unwrap_or(false))
            .count();
        filled as f32 / required.len() as f32
    }
}
