//! In-memory session store
//!
//! Authoritative copy of sessions, turns and user profiles, held in
//! dashmaps. Turns are append-only per session.

use async_trait::async_trait;
use dashmap::DashMap;

use task_router_core::{Result, Session, SessionStore, TurnRecord, UserProfile};

#[derive(Default)]
pub struct InMemoryStore {
    sessions: DashMap<String, Session>,
    turns: DashMap<String, Vec<TurnRecord>>,
    profiles: DashMap<String, UserProfile>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a user profile; used by wiring and tests.
    pub fn seed_profile(&self, profile: UserProfile) {
        self.profiles.insert(profile.user_id.clone(), profile);
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Turns persisted for a session, oldest first.
    pub fn turns_for(&self, session_id: &str) -> Vec<TurnRecord> {
        self.turns
            .get(session_id)
            .map(|t| t.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        Ok(self.sessions.get(session_id).map(|s| s.clone()))
    }

    async fn put_session(&self, session: &Session) -> Result<()> {
        self.sessions.insert(session.session_id.clone(), session.clone());
        Ok(())
    }

    async fn append_turn(&self, session_id: &str, turn: &TurnRecord) -> Result<()> {
        self.turns
            .entry(session_id.to_string())
            .or_default()
            .push(turn.clone());
        Ok(())
    }

    async fn get_profile(&self, user_id: &str) -> Result<Option<UserProfile>> {
        Ok(self.profiles.get(user_id).map(|p| p.clone()))
    }

    async fn put_profile(&self, profile: &UserProfile) -> Result<()> {
        self.profiles.insert(profile.user_id.clone(), profile.clone());
        Ok(())
    }

    async fn delete_session(&self, session_id: &str) -> Result<()> {
        self.sessions.remove(session_id);
        self.turns.remove(session_id);
        Ok(())
    }

    fn name(&self) -> &str {
        "in_memory_store"
    }
}
