//! Multi-agent dispatch classifier
//!
//! Independent from the route cache: maps an utterance to the name of the
//! reasoning agent that should handle the turn. Low confidence falls back to
//! the configured default agent (handled by the caller).

use std::sync::Arc;

use voxflow_config::AgentRouteConfig;
use voxflow_core::UtteranceEncoder;

use crate::vector_cache::cosine;
use crate::RoutingError;

struct CompiledAgentRoute {
    agent: String,
    threshold: f32,
    vectors: Vec<Vec<f32>>,
}

/// Similarity classifier selecting a reasoning agent per turn
pub struct AgentRouter {
    encoder: Arc<dyn UtteranceEncoder>,
    entries: Vec<CompiledAgentRoute>,
}

impl AgentRouter {
    pub fn build(
        entries: &[AgentRouteConfig],
        encoder: Arc<dyn UtteranceEncoder>,
    ) -> Result<Self, RoutingError> {
        let mut compiled = Vec::with_capacity(entries.len());

        for entry in entries {
            if entry.utterances.is_empty() {
                return Err(RoutingError::EmptyRoute(entry.agent.clone()));
            }
            compiled.push(CompiledAgentRoute {
                agent: entry.agent.clone(),
                threshold: entry.score_threshold,
                vectors: entry.utterances.iter().map(|u| encoder.encode(u)).collect(),
            });
        }

        Ok(Self {
            encoder,
            entries: compiled,
        })
    }

    /// Name of the agent for this utterance, or `None` when no entry clears
    /// its threshold (caller falls back to the default agent).
    pub fn classify(&self, utterance: &str) -> Option<&str> {
        let query = self.encoder.encode(utterance);

        let mut best: Option<(&CompiledAgentRoute, f32)> = None;
        for entry in &self.entries {
            let score = entry
                .vectors
                .iter()
                .map(|v| cosine(&query, v))
                .fold(0.0, f32::max);

            if score < entry.threshold {
                continue;
            }
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((entry, score));
            }
        }

        best.map(|(entry, score)| {
            tracing::debug!(agent = %entry.agent, score = format!("{:.3}", score), "Agent routed");
            entry.agent.as_str()
        })
    }
}
