//! Synthesizer port

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::PortError;
use crate::packet::DataPacket;

/// Streaming text-to-speech provider
///
/// Text goes in through [`Synthesizer::push`]; synthesized audio packets come
/// back out of the stream returned by [`Synthesizer::audio_stream`], carrying
/// the metadata of the text packet that produced them.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Queue a text packet for synthesis
    async fn push(&self, packet: DataPacket) -> Result<(), PortError>;

    /// Synthesized audio packets, in push order within a sequence. Callable
    /// once per session.
    fn audio_stream(&self) -> BoxStream<'static, DataPacket>;

    /// Engine identifier for logging
    fn engine(&self) -> &str;

    /// Total characters synthesized so far (billing metric)
    fn synthesized_characters(&self) -> usize;

    /// Long-lived provider keepalive loop
    async fn monitor_connection(&self) -> Result<(), PortError>;

    /// Drop any queued synthesis work after a barge-in
    async fn handle_interruption(&self);

    /// Release provider resources at teardown
    async fn cleanup(&self);
}
