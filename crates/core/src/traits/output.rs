//! Output sink port

use async_trait::async_trait;

use crate::error::PortError;
use crate::packet::DataPacket;

/// Outbound audio/text channel for a session
#[async_trait]
pub trait OutputSink: Send + Sync {
    /// Deliver one packet to the user
    async fn handle(&self, packet: DataPacket) -> Result<(), PortError>;

    /// Discard transport-side buffered audio after a barge-in
    async fn handle_interruption(&self) -> Result<(), PortError>;

    /// Provider identifier for logging
    fn provider(&self) -> &str;

    /// Mark that the hangup message has been delivered
    fn set_hangup_sent(&self);

    /// Acknowledge a web-initiated session's init event
    async fn send_init_ack(&self) -> Result<(), PortError>;
}
