//! Configuration management for the task router
//!
//! Supports loading configuration from:
//! - TOML files
//! - Environment variables (TASK_ROUTER_ prefix)
//!
//! The intent catalog (intents, slots, dependencies, inheritance rules)
//! lives in a separate YAML file and is validated structurally at load
//! time; a successful admin reload publishes a whole new snapshot.

pub mod catalog;
pub mod settings;

pub use catalog::{default_catalog, load_catalog, load_catalog_str, CatalogFile};
pub use settings::{
    load_settings, BreakerSettings, DialogueSettings, FunctionSettings, NluSettings,
    RateLimitSettings, ResolverSettings, RetrySettings, ServerSettings, SessionSettings, Settings,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Invalid catalog: {0}")]
    InvalidCatalog(String),
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}

impl From<ConfigError> for task_router_core::Error {
    fn from(err: ConfigError) -> Self {
        task_router_core::Error::new(task_router_core::ErrorCode::Configuration, err.to_string())
    }
}
