//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::{AgentsConfig, ApiToolConfig, ConfigError, ConversationConfig, RoutingSettings};

/// Runtime environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    /// Development mode - relaxed validation, warnings only
    #[default]
    Development,
    /// Staging mode - stricter validation
    Staging,
    /// Production mode - all validations enforced
    Production,
}

impl RuntimeEnvironment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    pub fn is_strict(&self) -> bool {
        matches!(self, Self::Production | Self::Staging)
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Runtime environment (development, staging, production)
    #[serde(default)]
    pub environment: RuntimeEnvironment,

    /// Conversation policy
    #[serde(default)]
    pub conversation: ConversationConfig,

    /// Route cache
    #[serde(default)]
    pub routing: RoutingSettings,

    /// Agent bindings
    #[serde(default)]
    pub agents: AgentsConfig,

    /// External API tools available to agents
    #[serde(default)]
    pub api_tools: Vec<ApiToolConfig>,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate all sections
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.conversation.validate()?;
        self.routing.validate()?;
        self.agents.validate()?;

        // Agent tool references must resolve to a configured tool
        for (name, profile) in &self.agents.profiles {
            for tool in &profile.tools {
                if !self.api_tools.iter().any(|t| &t.name == tool) {
                    if self.environment.is_strict() {
                        return Err(ConfigError::InvalidValue {
                            field: format!("agents.profiles.{}.tools", name),
                            message: format!("Unknown tool '{}'", tool),
                        });
                    }
                    tracing::warn!(agent = %name, tool = %tool, "Unknown tool reference");
                }
            }
        }

        Ok(())
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub log_json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
        }
    }
}

/// Load settings from files and environment
///
/// Priority (highest to lowest):
/// 1. Environment variables (VOXFLOW_ prefix)
/// 2. config/{env}.yaml (if env specified)
/// 3. config/default.yaml
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(File::with_name("config/default").required(false));

    if let Some(env_name) = env {
        builder =
            builder.add_source(File::with_name(&format!("config/{}", env_name)).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("VOXFLOW")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::{AgentProfile, RouteConfig, RouteResponse};

    #[test]
    fn test_default_settings_validate() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.conversation.output_channel_capacity, 64);
    }

    #[test]
    fn test_invalid_route_threshold_rejected() {
        let mut settings = Settings::default();
        settings.routing.routes.push(RouteConfig {
            route_name: "lights_on".to_string(),
            score_threshold: 1.5,
            utterances: vec!["turn on the lights".to_string()],
            response: RouteResponse::Single("Done.".to_string()),
        });
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_unknown_tool_reference_strict() {
        let mut settings = Settings::default();
        settings.environment = RuntimeEnvironment::Production;
        settings.agents.default_agent = "sales".to_string();
        settings.agents.profiles.insert(
            "sales".to_string(),
            AgentProfile {
                provider: "openai".to_string(),
                model: "gpt-4o-mini".to_string(),
                temperature: 0.7,
                max_tokens: 256,
                tools: vec!["book_appointment".to_string()],
            },
        );
        assert!(settings.validate().is_err());
    }
}
