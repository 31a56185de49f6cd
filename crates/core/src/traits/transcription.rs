//! Transcriber port

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::PortError;

/// Events produced by a streaming transcriber
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TranscriberEvent {
    /// Voice activity detected
    SpeechStarted,
    /// Interim (non-final) transcript fragment
    Interim { content: String },
    /// Finalized transcript for the current utterance
    Final { content: String },
    /// Provider connection closed; reports total transcribed audio seconds
    ConnectionClosed { duration_secs: f64 },
}

/// Streaming speech-to-text provider
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Run the transcription loop, emitting events until the connection ends.
    /// The sender is the only path back into the orchestrator.
    async fn run(&self, events: mpsc::Sender<TranscriberEvent>) -> Result<(), PortError>;

    /// Open or close the provider connection (used at teardown for streaming
    /// transports)
    async fn toggle_connection(&self) -> Result<(), PortError>;
}
