//! Error monitor
//!
//! Windowed per-code and per-category counters feeding alert rules. Rules
//! fire when the count inside the window crosses a threshold; a cooldown
//! suppresses repeat alerts for the same rule.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;

use crate::error::{ErrorCategory, ErrorCode, ErrorDetail};

/// Threshold rule over a rolling window.
#[derive(Debug, Clone)]
pub struct AlertRule {
    pub name: String,
    /// Restrict to one category; `None` watches everything.
    pub category: Option<ErrorCategory>,
    pub threshold: u32,
    pub window: Duration,
    pub cooldown: Duration,
}

impl AlertRule {
    pub fn for_category(
        name: impl Into<String>,
        category: ErrorCategory,
        threshold: u32,
        window_secs: i64,
        cooldown_secs: i64,
    ) -> Self {
        Self {
            name: name.into(),
            category: Some(category),
            threshold,
            window: Duration::seconds(window_secs),
            cooldown: Duration::seconds(cooldown_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorStats {
    pub total: u64,
    pub by_code: HashMap<String, u64>,
    pub by_category: HashMap<String, u64>,
}

#[derive(Debug)]
struct MonitorInner {
    /// (timestamp, code) events inside the widest rule window.
    events: Vec<(DateTime<Utc>, ErrorCode)>,
    by_code: HashMap<ErrorCode, u64>,
    by_category: HashMap<ErrorCategory, u64>,
    total: u64,
    last_fired: HashMap<String, DateTime<Utc>>,
}

/// Process-wide error observer. Components report every classified failure
/// here; the admin surface reads the aggregate.
pub struct ErrorMonitor {
    rules: Vec<AlertRule>,
    inner: Mutex<MonitorInner>,
}

impl ErrorMonitor {
    pub fn new(rules: Vec<AlertRule>) -> Self {
        Self {
            rules,
            inner: Mutex::new(MonitorInner {
                events: Vec::new(),
                by_code: HashMap::new(),
                by_category: HashMap::new(),
                total: 0,
                last_fired: HashMap::new(),
            }),
        }
    }

    /// Record one classified failure; returns the names of alert rules
    /// that fired on this observation.
    pub fn observe(&self, detail: &ErrorDetail) -> Vec<String> {
        let now = Utc::now();
        let mut inner = self.inner.lock();

        inner.total += 1;
        *inner.by_code.entry(detail.code).or_insert(0) += 1;
        *inner.by_category.entry(detail.category).or_insert(0) += 1;
        inner.events.push((now, detail.code));

        // Trim to the widest window any rule needs.
        let horizon = self
            .rules
            .iter()
            .map(|r| r.window)
            .max()
            .unwrap_or_else(|| Duration::seconds(300));
        inner.events.retain(|(t, _)| now - *t <= horizon);

        let mut fired = Vec::new();
        for rule in &self.rules {
            if let Some(last) = inner.last_fired.get(&rule.name) {
                if now - *last < rule.cooldown {
                    continue;
                }
            }
            let count = inner
                .events
                .iter()
                .filter(|(t, code)| {
                    now - *t <= rule.window
                        && rule.category.map(|c| code.category() == c).unwrap_or(true)
                })
                .count() as u32;
            if count >= rule.threshold {
                tracing::error!(
                    rule = %rule.name,
                    count,
                    threshold = rule.threshold,
                    "error rate alert"
                );
                inner.last_fired.insert(rule.name.clone(), now);
                fired.push(rule.name.clone());
            }
        }
        fired
    }

    pub fn stats(&self) -> ErrorStats {
        let inner = self.inner.lock();
        ErrorStats {
            total: inner.total,
            by_code: inner
                .by_code
                .iter()
                .map(|(k, v)| (k.as_str().to_string(), *v))
                .collect(),
            by_category: inner
                .by_category
                .iter()
                .map(|(k, v)| (k.as_str().to_string(), *v))
                .collect(),
        }
    }
}

impl Default for ErrorMonitor {
    fn default() -> Self {
        Self::new(vec![
            AlertRule::for_category("external_service_errors", ErrorCategory::ExternalService, 10, 60, 300),
            AlertRule::for_category("storage_errors", ErrorCategory::Storage, 5, 60, 300),
        ])
    }
}
