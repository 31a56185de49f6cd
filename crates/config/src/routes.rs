//! Route cache, agent binding, and tool configuration

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::ConfigError;

/// One cached route: example utterances mapped to a canned response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Route identifier
    pub route_name: String,

    /// Minimum similarity score for this route to win
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f32,

    /// Example utterances indexed for similarity scoring
    pub utterances: Vec<String>,

    /// Canned response: one string for the whole route, or one response per
    /// utterance
    pub response: RouteResponse,
}

/// Route response shape
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RouteResponse {
    /// Single response regardless of which utterance matched
    Single(String),
    /// Responses aligned 1:1 with the route's utterances; resolved by the
    /// utterance nearest the incoming query
    PerUtterance(Vec<String>),
}

impl RouteConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.utterances.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: format!("routes.{}.utterances", self.route_name),
                message: "At least one utterance is required".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.score_threshold) {
            return Err(ConfigError::InvalidValue {
                field: format!("routes.{}.score_threshold", self.route_name),
                message: format!("Must be between 0.0 and 1.0, got {}", self.score_threshold),
            });
        }
        if let RouteResponse::PerUtterance(responses) = &self.response {
            if responses.len() != self.utterances.len() {
                return Err(ConfigError::InvalidValue {
                    field: format!("routes.{}.response", self.route_name),
                    message: format!(
                        "Per-utterance responses must match utterances ({} vs {})",
                        responses.len(),
                        self.utterances.len()
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Route cache settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutingSettings {
    /// Routes in declaration order; earlier routes win score ties
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

impl RoutingSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for route in &self.routes {
            route.validate()?;
        }
        Ok(())
    }
}

/// Per-agent generation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfile {
    /// Provider key, informational only (the binding is made by the caller)
    pub provider: String,

    /// Model identifier
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Tool names this agent may call
    #[serde(default)]
    pub tools: Vec<String>,
}

fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    256
}
fn default_score_threshold() -> f32 {
    0.85
}

/// Classifier entry routing utterances to a named agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRouteConfig {
    /// Target agent key
    pub agent: String,

    /// Example utterances for this agent
    pub utterances: Vec<String>,

    #[serde(default = "default_score_threshold")]
    pub score_threshold: f32,
}

/// Multi-agent binding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentsConfig {
    /// Agent used when the classifier abstains
    #[serde(default = "default_agent_key")]
    pub default_agent: String,

    /// Per-agent profiles keyed by agent name
    #[serde(default)]
    pub profiles: HashMap<String, AgentProfile>,

    /// Classifier entries; empty means single-agent mode
    #[serde(default)]
    pub routing: Vec<AgentRouteConfig>,
}

fn default_agent_key() -> String {
    "primary".to_string()
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            default_agent: default_agent_key(),
            profiles: HashMap::new(),
            routing: Vec::new(),
        }
    }
}

impl AgentsConfig {
    pub fn is_multi_agent(&self) -> bool {
        self.profiles.len() > 1
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.profiles.is_empty() && !self.profiles.contains_key(&self.default_agent) {
            return Err(ConfigError::InvalidValue {
                field: "agents.default_agent".to_string(),
                message: format!("'{}' has no profile", self.default_agent),
            });
        }
        for entry in &self.routing {
            if !(0.0..=1.0).contains(&entry.score_threshold) {
                return Err(ConfigError::InvalidValue {
                    field: format!("agents.routing.{}", entry.agent),
                    message: format!(
                        "score_threshold must be between 0.0 and 1.0, got {}",
                        entry.score_threshold
                    ),
                });
            }
            if entry.utterances.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: format!("agents.routing.{}", entry.agent),
                    message: "At least one utterance is required".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// An external API tool the agent may call mid-generation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiToolConfig {
    /// Tool name as the agent refers to it
    pub name: String,

    /// Human description (forwarded to the agent's tool list)
    #[serde(default)]
    pub description: String,

    /// Webhook URL; `{placeholders}` are substituted from call arguments
    pub url: String,

    /// HTTP method
    #[serde(default = "default_method")]
    pub method: String,

    /// Bearer token, if the endpoint requires one
    #[serde(default)]
    pub api_token: Option<String>,

    /// JSON body template; string values containing `{placeholders}` are
    /// substituted from call arguments
    #[serde(default)]
    pub param_template: Option<serde_json::Value>,

    /// Request timeout
    #[serde(default = "default_tool_timeout")]
    pub timeout_secs: u64,
}

fn default_method() -> String {
    "POST".to_string()
}
fn default_tool_timeout() -> u64 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_response_shapes_deserialize() {
        let single: RouteConfig = serde_yaml::from_str(
            r#"
route_name: lights_on
score_threshold: 0.8
utterances: ["turn on the lights"]
response: "Lights are now on."
"#,
        )
        .unwrap();
        assert!(matches!(single.response, RouteResponse::Single(_)));
        assert!(single.validate().is_ok());

        let per_utterance: RouteConfig = serde_yaml::from_str(
            r#"
route_name: greetings
utterances: ["hello", "good morning"]
response: ["Hi!", "Good morning to you!"]
"#,
        )
        .unwrap();
        assert!(matches!(
            per_utterance.response,
            RouteResponse::PerUtterance(_)
        ));
        assert!(per_utterance.validate().is_ok());
    }

    #[test]
    fn test_per_utterance_length_mismatch() {
        let route = RouteConfig {
            route_name: "bad".to_string(),
            score_threshold: 0.8,
            utterances: vec!["one".to_string(), "two".to_string()],
            response: RouteResponse::PerUtterance(vec!["only one".to_string()]),
        };
        assert!(route.validate().is_err());
    }

    #[test]
    fn test_default_agent_must_have_profile() {
        let mut agents = AgentsConfig::default();
        agents.profiles.insert(
            "sales".to_string(),
            AgentProfile {
                provider: "openai".to_string(),
                model: "gpt-4o-mini".to_string(),
                temperature: 0.7,
                max_tokens: 256,
                tools: vec![],
            },
        );
        // default_agent is "primary", which has no profile
        assert!(agents.validate().is_err());

        agents.default_agent = "sales".to_string();
        assert!(agents.validate().is_ok());
    }
}
