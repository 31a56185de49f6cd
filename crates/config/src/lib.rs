//! Configuration management for the conversation orchestrator
//!
//! Supports loading configuration from:
//! - YAML/TOML files
//! - Environment variables (VOXFLOW_ prefix)
//!
//! Everything is assembled into one validated [`Settings`] struct at session
//! start; later reads are plain field accesses, never dynamic lookups.

pub mod conversation;
pub mod routes;
pub mod settings;
pub mod telemetry;

pub use conversation::{AmbientNoiseConfig, BackchannelConfig, ConversationConfig};
pub use routes::{
    AgentProfile, AgentRouteConfig, AgentsConfig, ApiToolConfig, RouteConfig, RouteResponse,
    RoutingSettings,
};
pub use settings::{load_settings, ObservabilityConfig, RuntimeEnvironment, Settings};
pub use telemetry::init_tracing;

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

    #[error("Environment error: {0}")]
    Environment(String),
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}
