//! Turn orchestration
//!
//! The pipeline crate owns the conversational state machine: it drives
//! transcription results into the reasoning agent, the agent's streamed
//! output into the synthesizer, and synthesized audio into the output sink,
//! with barge-in interruption, route-cache short-circuits, multi-agent
//! dispatch, liveness monitoring and graceful call termination.

pub mod events;
mod generation;
pub mod liveness;
pub mod metrics;
pub mod orchestrator;
pub mod sequence;
pub mod tasks;

pub use events::SessionEvent;
pub use liveness::LivenessState;
pub use metrics::SessionSummary;
pub use orchestrator::{
    AgentBindings, OrchestratorPorts, OrchestratorState, TurnOrchestrator,
};
pub use sequence::SequenceTracker;
pub use tasks::TaskRegistry;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Configuration error: {0}")]
    Config(#[from] voxflow_config::ConfigError),

    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    #[error("Channel closed")]
    ChannelClosed,
}
