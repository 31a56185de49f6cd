//! Core types and capability ports for the conversation orchestrator
//!
//! This crate provides the foundational pieces used across all other crates:
//! - Data packets and their staleness metadata
//! - Conversation history (turn-final, single-writer)
//! - Reasoning agent stream types
//! - Capability port traits for pluggable providers
//! - Error types

pub mod agent;
pub mod error;
pub mod history;
pub mod packet;
pub mod traits;

pub use agent::{AgentChunk, CompletionVerdict, ToolCallRequest};
pub use error::{Error, PortError, Result};
pub use history::{ConversationHistory, Turn, TurnRole};
pub use packet::{
    DataPacket, PacketMeta, PacketOrigin, PacketPayload, RESERVED_SEQUENCE_ID,
};
pub use traits::{
    InputSource, OutputSink, ReasoningAgent, Synthesizer, Transcriber, TranscriberEvent,
    UtteranceEncoder,
};
