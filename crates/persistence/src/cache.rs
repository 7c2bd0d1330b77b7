//! In-memory TTL cache
//!
//! KV cache with per-entry TTL. Expired entries are dropped lazily on
//! read and in bulk by `clear_expired`, which the server's sweep task
//! calls periodically.

use async_trait::async_trait;
use dashmap::DashMap;
use std::time::{Duration, Instant};

use task_router_core::{Cache, Result};

struct Entry {
    value: String,
    expires_at: Instant,
}

#[derive(Default)]
pub struct InMemoryCache {
    entries: DashMap<String, Entry>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at > Instant::now() {
                return Ok(Some(entry.value.clone()));
            }
        }
        // Lazily drop the expired entry.
        self.entries
            .remove_if(key, |_, e| e.expires_at <= Instant::now());
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn clear_expired(&self) -> Result<usize> {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| e.expires_at > now);
        let removed = before - self.entries.len();
        if removed > 0 {
            tracing::debug!(removed, "cache expiry sweep");
        }
        Ok(removed)
    }

    /// Entries closest to expiry go first: the half of the cache with the
    /// nearest deadlines is shed.
    async fn clear_low_priority(&self) -> Result<usize> {
        if self.entries.len() < 2 {
            return Ok(0);
        }
        let mut deadlines: Vec<Instant> = self.entries.iter().map(|e| e.expires_at).collect();
        deadlines.sort();
        let cutoff = deadlines[deadlines.len() / 2];
        let before = self.entries.len();
        self.entries.retain(|_, e| e.expires_at > cutoff);
        let removed = before - self.entries.len();
        tracing::info!(removed, "cache pressure shed");
        Ok(removed)
    }

    fn name(&self) -> &str {
        "in_memory_cache"
    }
}
