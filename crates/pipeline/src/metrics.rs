//! Session metrics
//!
//! Aggregated at teardown as the orchestrator's terminal return value.

use serde::Serialize;
use std::time::Instant;

use voxflow_core::Turn;

/// Final result of an orchestrated session
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    /// Full conversation transcript
    pub messages: Vec<Turn>,
    /// Wall-clock session duration
    pub conversation_secs: f64,
    /// Total transcribed audio reported by the transcriber
    pub transcription_secs: f64,
    /// Characters pushed through the synthesizer
    pub synthesized_characters: usize,
    /// The assistant (hangup path) ended the call rather than the user
    pub ended_by_assistant: bool,
    /// Number of interruptions observed (final turn counter)
    pub turn_count: u64,
    /// First-token latency per agent generation
    pub agent_latencies_ms: Vec<u64>,
}

/// Mutable counters accumulated while the session runs
#[derive(Debug)]
pub(crate) struct SessionMetrics {
    pub started: Instant,
    pub transcription_secs: f64,
    pub agent_latencies_ms: Vec<u64>,
}

impl SessionMetrics {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            transcription_secs: 0.0,
            agent_latencies_ms: Vec::new(),
        }
    }
}
