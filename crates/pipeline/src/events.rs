//! Internal session events
//!
//! A single tagged event channel replaces observer-callback registration:
//! reader tasks (drain loop, monitor, generation driver, transport init)
//! report back to the orchestrator exclusively through [`SessionEvent`]s,
//! keeping control flow linear and history mutation single-writer.

use std::collections::HashMap;

use voxflow_core::{PacketOrigin, Turn};

/// Events consumed by the orchestrator's main loop
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The silence monitor or a completion check decided the call should end
    HangupRequested,

    /// The drain loop delivered the last chunk of a message to the sink
    FinalChunkPlayed { origin: PacketOrigin },

    /// Silence passed the short threshold; ask the user once per episode
    StillTherePrompt,

    /// A web-initiated transport delivered session context after start
    InitReceived { context: HashMap<String, String> },

    /// A generation task finished a full exchange; `turns` holds any tool
    /// call/result pairs followed by the user and assistant entries, to be
    /// committed to history atomically
    ExchangeCompleted {
        turns: Vec<Turn>,
        latency_ms: Option<u64>,
    },

    /// The current exchange was abandoned (provider error, tool failure)
    TurnFailed { reason: String },

    /// The welcome task gave up waiting for a transport stream id
    WelcomeTimedOut,
}
