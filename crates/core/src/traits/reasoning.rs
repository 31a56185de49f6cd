//! Reasoning agent port

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::agent::{AgentChunk, CompletionVerdict};
use crate::error::PortError;
use crate::history::Turn;
use crate::packet::PacketMeta;

/// A reasoning agent (LLM) behind a streaming generation interface
///
/// Structural validity of the agent's output is the implementation's
/// responsibility; the orchestrator treats any stream error as a failed turn
/// and does not retry.
#[async_trait]
pub trait ReasoningAgent: Send + Sync {
    /// Generate a response for the given messages. Yields partial-output
    /// events; the final event carries `end_of_stream = true`. A tool-call
    /// event suspends streaming until the orchestrator re-invokes `generate`
    /// with the augmented history.
    fn generate(
        &self,
        messages: Vec<Turn>,
        meta: PacketMeta,
    ) -> BoxStream<'static, Result<AgentChunk, PortError>>;

    /// Ask the model whether the conversation should end
    async fn check_for_completion(
        &self,
        history: &[Turn],
        prompt: &str,
    ) -> Result<CompletionVerdict, PortError>;

    /// Model identifier for logging
    fn model_name(&self) -> &str;
}
