//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::ConfigError;

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub nlu: NluSettings,

    #[serde(default)]
    pub resolver: ResolverSettings,

    #[serde(default)]
    pub dialogue: DialogueSettings,

    #[serde(default)]
    pub session: SessionSettings,

    #[serde(default)]
    pub functions: FunctionSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub breaker: BreakerSettings,

    #[serde(default)]
    pub rate_limit: RateLimitSettings,

    /// Path to the intent catalog file (YAML)
    #[serde(default = "default_catalog_path")]
    pub catalog_path: String,
}

fn default_catalog_path() -> String {
    "config/catalog.yaml".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub cors_enabled: bool,
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Whole-request deadline in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Maximum accepted `input` length in characters
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_request_timeout_ms() -> u64 {
    15_000
}

fn default_max_input_chars() -> usize {
    1_000
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_enabled: false,
            cors_origins: Vec::new(),
            request_timeout_ms: default_request_timeout_ms(),
            max_input_chars: default_max_input_chars(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NluSettings {
    /// External NLU endpoint; empty means fallback-only (dev mode)
    #[serde(default)]
    pub endpoint: String,
    /// Hard deadline per classify call
    #[serde(default = "default_nlu_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_nlu_timeout_ms() -> u64 {
    2_000
}

impl Default for NluSettings {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            timeout_ms: default_nlu_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FunctionSettings {
    /// Function-call backend base URL; empty means the canned dev
    /// executor
    #[serde(default)]
    pub endpoint: String,
}

/// Thresholds driving intent resolution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverSettings {
    /// Margin a candidate must beat the runner-up by to win outright
    #[serde(default = "default_margin")]
    pub margin: f32,
    /// Confidence needed to switch away from an in-flight intent
    #[serde(default = "default_switch_threshold")]
    pub switch_threshold: f32,
    /// Candidates within this distance of the top are ambiguous together
    #[serde(default = "default_ambiguity_window")]
    pub ambiguity_window: f32,
    /// Candidates below this floor never participate in ambiguity
    #[serde(default = "default_ambiguity_floor")]
    pub ambiguity_floor: f32,
}

fn default_margin() -> f32 {
    0.1
}

fn default_switch_threshold() -> f32 {
    0.75
}

fn default_ambiguity_window() -> f32 {
    0.08
}

fn default_ambiguity_floor() -> f32 {
    0.5
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            margin: default_margin(),
            switch_threshold: default_switch_threshold(),
            ambiguity_window: default_ambiguity_window(),
            ambiguity_floor: default_ambiguity_floor(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogueSettings {
    /// Question candidates generated before scoring
    #[serde(default = "default_question_candidates")]
    pub question_candidates: usize,
    /// Function-call deadline
    #[serde(default = "default_function_timeout_ms")]
    pub function_timeout_ms: u64,
    /// Default engagement when the request does not supply one
    #[serde(default = "default_engagement")]
    pub default_engagement: f32,
    /// Default time pressure when the request does not supply one
    #[serde(default = "default_time_pressure")]
    pub default_time_pressure: f32,
}

fn default_question_candidates() -> usize {
    4
}

fn default_function_timeout_ms() -> u64 {
    10_000
}

fn default_engagement() -> f32 {
    0.7
}

fn default_time_pressure() -> f32 {
    0.3
}

impl Default for DialogueSettings {
    fn default() -> Self {
        Self {
            question_candidates: default_question_candidates(),
            function_timeout_ms: default_function_timeout_ms(),
            default_engagement: default_engagement(),
            default_time_pressure: default_time_pressure(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Sliding TTL for live sessions
    #[serde(default = "default_session_ttl_secs")]
    pub ttl_secs: u64,
    /// How long a colliding turn waits for the session lock before failing
    /// with SESSION_BUSY; 0 fails fast
    #[serde(default)]
    pub busy_wait_ms: u64,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    /// Expiry sweep interval
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

fn default_session_ttl_secs() -> u64 {
    1_800
}

fn default_max_sessions() -> usize {
    10_000
}

fn default_cleanup_interval_secs() -> u64 {
    300
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            ttl_secs: default_session_ttl_secs(),
            busy_wait_ms: 0,
            max_sessions: default_max_sessions(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_max_retries() -> u32 {
    1
}

fn default_initial_backoff_ms() -> u64 {
    100
}

fn default_max_backoff_ms() -> u64 {
    2_000
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl From<RetrySettings> for task_router_core::RetryConfig {
    fn from(s: RetrySettings) -> Self {
        Self {
            max_retries: s.max_retries,
            initial_backoff_ms: s.initial_backoff_ms,
            max_backoff_ms: s.max_backoff_ms,
            multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerSettings {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_recovery_timeout_secs")]
    pub recovery_timeout_secs: u64,
    #[serde(default = "default_half_open_max_calls")]
    pub half_open_max_calls: u32,
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_window_secs() -> u64 {
    60
}

fn default_recovery_timeout_secs() -> u64 {
    30
}

fn default_half_open_max_calls() -> u32 {
    3
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            window_secs: default_window_secs(),
            recovery_timeout_secs: default_recovery_timeout_secs(),
            half_open_max_calls: default_half_open_max_calls(),
        }
    }
}

impl From<BreakerSettings> for task_router_core::CircuitBreakerConfig {
    fn from(s: BreakerSettings) -> Self {
        Self {
            failure_threshold: s.failure_threshold,
            window_secs: s.window_secs,
            recovery_timeout_secs: s.recovery_timeout_secs,
            half_open_max_calls: s.half_open_max_calls,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    #[serde(default = "default_rate_enabled")]
    pub enabled: bool,
    /// Sustained requests per minute per user
    #[serde(default = "default_user_per_minute")]
    pub user_per_minute: u32,
    /// Sustained requests per minute per client IP
    #[serde(default = "default_ip_per_minute")]
    pub ip_per_minute: u32,
    /// Bucket burst capacity
    #[serde(default = "default_burst")]
    pub burst: u32,
}

fn default_rate_enabled() -> bool {
    true
}

fn default_user_per_minute() -> u32 {
    60
}

fn default_ip_per_minute() -> u32 {
    120
}

fn default_burst() -> u32 {
    10
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: default_rate_enabled(),
            user_per_minute: default_user_per_minute(),
            ip_per_minute: default_ip_per_minute(),
            burst: default_burst(),
        }
    }
}

impl Settings {
    /// Validate cross-field constraints that serde defaults cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.resolver.ambiguity_floor) {
            return Err(ConfigError::InvalidValue {
                field: "resolver.ambiguity_floor".to_string(),
                message: "must be within [0, 1]".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.resolver.switch_threshold) {
            return Err(ConfigError::InvalidValue {
                field: "resolver.switch_threshold".to_string(),
                message: "must be within [0, 1]".to_string(),
            });
        }
        if self.resolver.margin < 0.0 || self.resolver.ambiguity_window < 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "resolver.margin".to_string(),
                message: "margins must be non-negative".to_string(),
            });
        }
        if self.server.max_input_chars == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.max_input_chars".to_string(),
                message: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// Load settings from an optional file plus `TASK_ROUTER_*` environment
/// overrides (e.g. `TASK_ROUTER_SERVER__PORT=9000`).
pub fn load_settings(path: Option<&Path>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    if let Some(path) = path {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }
        builder = builder.add_source(File::from(path));
    }

    let config = builder
        .add_source(Environment::with_prefix("TASK_ROUTER").separator("__"))
        .build()?;

    let settings: Settings = config.try_deserialize()?;
    settings.validate()?;
    Ok(settings)
}
