//! Session management
//!
//! Serializes turns per session: `acquire` hands out the session behind
//! an owned mutex guard, so overlapping requests for the same session
//! either wait briefly or fail fast as busy, per configuration. Live
//! sessions sit in the cache with a sliding TTL; the store keeps the
//! authoritative copy.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

use task_router_config::SessionSettings;
use task_router_core::{Cache, Error, ErrorCode, InboundContext, Result, Session, SessionState, SessionStore};

/// A session acquired for one turn. Dropping the guard releases the
/// session for the next turn.
#[derive(Debug)]
pub struct AcquiredSession {
    pub guard: OwnedMutexGuard<Session>,
    /// The id the client should continue with (fresh when the requested
    /// one was stale or absent).
    pub session_id: String,
    pub created: bool,
}

pub struct SessionManager {
    live: DashMap<String, Arc<Mutex<Session>>>,
    store: Arc<dyn SessionStore>,
    cache: Arc<dyn Cache>,
    settings: SessionSettings,
    /// (engagement, time_pressure) stamped onto fresh sessions.
    dialogue_defaults: (f32, f32),
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn SessionStore>,
        cache: Arc<dyn Cache>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            live: DashMap::new(),
            store,
            cache,
            settings,
            dialogue_defaults: (0.7, 0.3),
        }
    }

    pub fn with_dialogue_defaults(mut self, engagement: f32, time_pressure: f32) -> Self {
        self.dialogue_defaults = (engagement.clamp(0.0, 1.0), time_pressure.clamp(0.0, 1.0));
        self
    }

    fn cache_key(session_id: &str) -> String {
        format!("session:{session_id}")
    }

    fn context_key(session_id: &str) -> String {
        format!("user_context:{session_id}")
    }

    fn ttl(&self) -> Duration {
        Duration::from_secs(self.settings.ttl_secs)
    }

    /// Acquire the session exclusively, creating one when the id is
    /// absent or stale. Exactly one turn per session runs at a time.
    pub async fn acquire(
        &self,
        session_id: Option<&str>,
        user_id: &str,
    ) -> Result<AcquiredSession> {
        let (entry_id, entry, created) = self.lookup_or_create(session_id, user_id).await?;

        let guard = if self.settings.busy_wait_ms == 0 {
            entry.try_lock_owned().map_err(|_| {
                Error::new(ErrorCode::InvalidState, "session busy")
                    .with_context("session_id", entry_id.clone())
            })?
        } else {
            match tokio::time::timeout(
                Duration::from_millis(self.settings.busy_wait_ms),
                entry.lock_owned(),
            )
            .await
            {
                Ok(guard) => guard,
                Err(_) => {
                    return Err(Error::new(ErrorCode::Unavailable, "session unavailable")
                        .with_context("session_id", entry_id.clone()))
                },
            }
        };

        Ok(AcquiredSession {
            guard,
            session_id: entry_id,
            created,
        })
    }

    async fn lookup_or_create(
        &self,
        session_id: Option<&str>,
        user_id: &str,
    ) -> Result<(String, Arc<Mutex<Session>>, bool)> {
        if let Some(id) = session_id.filter(|id| !id.is_empty()) {
            if let Some(entry) = self.live.get(id) {
                return Ok((id.to_string(), entry.clone(), false));
            }
            // Cache first, store as the authority behind it.
            if let Some(session) = self.load(id).await {
                let entry = self
                    .live
                    .entry(id.to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(session)))
                    .clone();
                return Ok((id.to_string(), entry, false));
            }
            tracing::info!(requested = %id, "stale session id, creating a fresh session");
        }

        if self.live.len() >= self.settings.max_sessions {
            self.sweep_expired().await;
            if self.live.len() >= self.settings.max_sessions {
                // Shed cache weight too while the process is saturated.
                let _ = self.cache.clear_low_priority().await;
                return Err(Error::new(ErrorCode::ResourceExhausted, "session capacity reached"));
            }
        }

        let id = uuid::Uuid::new_v4().to_string();
        let mut session = Session::new(&id, user_id);
        session.engagement = self.dialogue_defaults.0;
        session.time_pressure = self.dialogue_defaults.1;
        let entry = Arc::new(Mutex::new(session));
        self.live.insert(id.clone(), entry.clone());
        tracing::info!(session_id = %id, user_id = %user_id, "created session");
        Ok((id, entry, true))
    }

    /// Cache read degrading to the store; either may miss.
    async fn load(&self, session_id: &str) -> Option<Session> {
        match self.cache.get(&Self::cache_key(session_id)).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(session) => return Some(session),
                Err(e) => tracing::warn!(session_id, error = %e, "cached session malformed"),
            },
            Ok(None) => {},
            Err(e) => tracing::warn!(session_id, code = %e.code(), "cache read failed"),
        }
        match self.store.get_session(session_id).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(session_id, code = %e.code(), "store read failed");
                None
            },
        }
    }

    /// Refresh the cached copy after a turn (sliding TTL). The engine has
    /// already written the authoritative copy to the store.
    pub async fn persist(&self, session: &Session) {
        match serde_json::to_string(session) {
            Ok(raw) => {
                if let Err(e) = self
                    .cache
                    .set(&Self::cache_key(&session.session_id), &raw, self.ttl())
                    .await
                {
                    tracing::warn!(code = %e.code(), "session cache write failed");
                }
            },
            Err(e) => tracing::error!(error = %e, "session serialization failed"),
        }
    }

    /// Persist the per-request context fragment under its own TTL.
    pub async fn persist_context(&self, session_id: &str, context: &InboundContext) {
        if context.is_empty() {
            return;
        }
        if let Ok(raw) = serde_json::to_string(context) {
            let _ = self
                .cache
                .set(&Self::context_key(session_id), &raw, self.ttl())
                .await;
        }
    }

    /// Read-only copy for analytics and the admin surface.
    pub async fn snapshot(&self, session_id: &str) -> Option<Session> {
        if let Some(entry) = self.live.get(session_id) {
            if let Ok(guard) = entry.try_lock() {
                return Some(guard.clone());
            }
        }
        self.load(session_id).await
    }

    /// Close and drop a session explicitly.
    pub async fn close(&self, session_id: &str) -> Result<()> {
        if let Some((_, entry)) = self.live.remove(session_id) {
            let mut session = entry.lock_owned().await;
            session.state = SessionState::Closed;
            self.store.put_session(&session).await?;
        }
        self.cache.del(&Self::cache_key(session_id)).await?;
        Ok(())
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Expire sessions idle past the TTL, closing them cleanly.
    pub async fn sweep_expired(&self) {
        let ttl = chrono::Duration::seconds(self.settings.ttl_secs as i64);
        let expired: Vec<(String, Arc<Mutex<Session>>)> = self
            .live
            .iter()
            .filter_map(|entry| {
                // A locked session is mid-turn and by definition not idle.
                match entry.value().try_lock() {
                    Ok(session) if session.is_expired(ttl) => {
                        Some((entry.key().clone(), entry.value().clone()))
                    },
                    _ => None,
                }
            })
            .collect();

        for (id, entry) in expired {
            self.live.remove(&id);
            let mut session = entry.lock_owned().await;
            session.state = SessionState::Closed;
            if let Err(e) = self.store.put_session(&session).await {
                tracing::warn!(session_id = %id, code = %e.code(), "expired session flush failed");
            }
            let _ = self.cache.del(&Self::cache_key(&id)).await;
            tracing::info!(session_id = %id, "expired session closed");
        }

        if let Ok(removed) = self.cache.clear_expired().await {
            if removed > 0 {
                tracing::debug!(removed, "cache sweep");
            }
        }
    }

    /// Spawn the periodic expiry sweep; returns a shutdown sender.
    pub fn start_sweep_task(self: &Arc<Self>) -> tokio::sync::watch::Sender<bool> {
        let (shutdown_tx, mut shutdown_rx) = tokio::sync::watch::channel(false);
        let manager = Arc::clone(self);
        let interval = Duration::from_secs(self.settings.cleanup_interval_secs);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        manager.sweep_expired().await;
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::info!("session sweep task shutting down");
                            break;
                        }
                    }
                }
            }
        });

        shutdown_tx
    }
}
