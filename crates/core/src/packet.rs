//! Data packets exchanged between pipeline stages
//!
//! A [`DataPacket`] is an immutable envelope of payload plus metadata. Packets
//! are owned by exactly one stage at a time and change hands only by channel
//! send; nothing in the pipeline mutates a packet it did not create.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sentinel sequence id for out-of-band messages (welcome message,
/// still-there prompt, hangup message). A freshly reset live set contains
/// exactly this id, so out-of-band audio always passes the liveness filter.
pub const RESERVED_SEQUENCE_ID: i64 = -1;

/// Where a packet originated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PacketOrigin {
    /// Finalized transcript forwarded to the reasoning stage
    Transcriber,
    /// Reasoning agent output (streamed or whole-response)
    #[default]
    Agent,
    /// Served from the route cache without invoking the agent
    RouteCache,
    /// Synthesized audio
    Synthesizer,
    /// Session welcome message
    Welcome,
    /// "Are you still there" prompt
    StillThere,
    /// Configured hangup message
    Hangup,
    /// Backchannel filler audio
    Backchannel,
    /// Ambient noise loop
    Ambient,
}

/// Packet payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PacketPayload {
    /// Text fragment (transcript or agent output)
    Text(String),
    /// Encoded audio bytes
    Audio(Vec<u8>),
    /// Transport mark / control label
    Mark(String),
}

impl PacketPayload {
    /// Text content, if this is a text payload
    pub fn as_text(&self) -> Option<&str> {
        match self {
            PacketPayload::Text(t) => Some(t),
            _ => None,
        }
    }

    /// Audio bytes, if this is an audio payload
    pub fn as_audio(&self) -> Option<&[u8]> {
        match self {
            PacketPayload::Audio(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Character count for text payloads, 0 otherwise
    pub fn char_count(&self) -> usize {
        match self {
            PacketPayload::Text(t) => t.chars().count(),
            _ => 0,
        }
    }
}

/// Packet metadata
///
/// `sequence_id` and `turn_id` together form the staleness contract: any
/// packet whose sequence id is no longer live is dropped before it reaches
/// the output sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacketMeta {
    /// Monotonic id minted per finalized user utterance
    pub sequence_id: i64,
    /// Conversational turn counter, bumped on every interruption
    pub turn_id: u64,
    /// Correlation id for request logging
    pub request_id: Uuid,
    /// Last audio chunk of the current message
    #[serde(default)]
    pub is_final_chunk: bool,
    /// Last fragment of the agent's response for this turn
    #[serde(default)]
    pub end_of_stream: bool,
    /// Producing stage
    #[serde(default)]
    pub origin: PacketOrigin,
    /// Response came from the route cache rather than the agent
    #[serde(default)]
    pub cached: bool,
    /// When the packet was created
    pub created_at: DateTime<Utc>,
}

impl PacketMeta {
    /// Metadata for a live sequence
    pub fn new(sequence_id: i64, turn_id: u64) -> Self {
        Self {
            sequence_id,
            turn_id,
            request_id: Uuid::new_v4(),
            is_final_chunk: false,
            end_of_stream: false,
            origin: PacketOrigin::default(),
            cached: false,
            created_at: Utc::now(),
        }
    }

    /// Metadata for an out-of-band message carrying the reserved sequence id
    pub fn out_of_band(origin: PacketOrigin) -> Self {
        Self {
            sequence_id: RESERVED_SEQUENCE_ID,
            turn_id: 0,
            request_id: Uuid::new_v4(),
            is_final_chunk: false,
            end_of_stream: true,
            origin,
            cached: false,
            created_at: Utc::now(),
        }
    }

    pub fn with_origin(mut self, origin: PacketOrigin) -> Self {
        self.origin = origin;
        self
    }

    pub fn with_end_of_stream(mut self, end_of_stream: bool) -> Self {
        self.end_of_stream = end_of_stream;
        self
    }

    pub fn with_final_chunk(mut self, is_final_chunk: bool) -> Self {
        self.is_final_chunk = is_final_chunk;
        self
    }

    pub fn with_cached(mut self, cached: bool) -> Self {
        self.cached = cached;
        self
    }

    /// True for the reserved out-of-band sequence id
    pub fn is_out_of_band(&self) -> bool {
        self.sequence_id == RESERVED_SEQUENCE_ID
    }
}

/// Immutable payload + metadata envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataPacket {
    pub data: PacketPayload,
    pub meta: PacketMeta,
}

impl DataPacket {
    pub fn new(data: PacketPayload, meta: PacketMeta) -> Self {
        Self { data, meta }
    }

    /// Text packet
    pub fn text(content: impl Into<String>, meta: PacketMeta) -> Self {
        Self {
            data: PacketPayload::Text(content.into()),
            meta,
        }
    }

    /// Audio packet
    pub fn audio(bytes: Vec<u8>, meta: PacketMeta) -> Self {
        Self {
            data: PacketPayload::Audio(bytes),
            meta,
        }
    }
}
