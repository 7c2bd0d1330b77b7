//! Rate limiting
//!
//! Token buckets per user and per client IP, checked before a turn enters
//! the core. Exceeding either bucket short-circuits the request with a
//! pre-built rate-limit error.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Instant;

use task_router_config::RateLimitSettings;
use task_router_core::{Error, ErrorCode, Result};

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

pub struct RateLimiter {
    settings: RateLimitSettings,
    user_buckets: Mutex<HashMap<String, Bucket>>,
    ip_buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    pub fn new(settings: RateLimitSettings) -> Self {
        Self {
            settings,
            user_buckets: Mutex::new(HashMap::new()),
            ip_buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Check both buckets; consumes one token from each on success.
    pub fn check(&self, user_id: &str, ip: Option<&str>) -> Result<()> {
        if !self.settings.enabled {
            return Ok(());
        }
        let burst = self.settings.burst as f64;

        Self::take(
            &self.user_buckets,
            user_id,
            self.settings.user_per_minute,
            burst,
        )
        .map_err(|err| err.with_context("scope", "user"))?;

        if let Some(ip) = ip {
            Self::take(&self.ip_buckets, ip, self.settings.ip_per_minute, burst)
                .map_err(|err| err.with_context("scope", "ip"))?;
        }
        Ok(())
    }

    fn take(
        buckets: &Mutex<HashMap<String, Bucket>>,
        key: &str,
        per_minute: u32,
        burst: f64,
    ) -> Result<()> {
        let mut buckets = buckets.lock();
        let now = Instant::now();
        let bucket = buckets.entry(key.to_string()).or_insert(Bucket {
            tokens: burst,
            last_refill: now,
        });

        let refill = now.duration_since(bucket.last_refill).as_secs_f64() * per_minute as f64
            / 60.0;
        bucket.tokens = (bucket.tokens + refill).min(burst);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            metrics::counter!("router_rate_limited_total").increment(1);
            Err(Error::new(ErrorCode::RateLimited, format!("rate limit exceeded for '{key}'")))
        }
    }

    /// Retry-After hint in seconds for 429 responses.
    pub fn retry_after_secs(&self) -> u64 {
        (60 / self.settings.user_per_minute.max(1) as u64).max(1)
    }

    /// Drop buckets idle past ten minutes; called from the sweep task.
    pub fn evict_idle(&self) {
        let horizon = std::time::Duration::from_secs(600);
        for buckets in [&self.user_buckets, &self.ip_buckets] {
            buckets
                .lock()
                .retain(|_, b| b.last_refill.elapsed() < horizon);
        }
    }
}
