//! Input source port

use async_trait::async_trait;

use crate::error::PortError;

/// Inbound media/text channel for a session
///
/// The implementation owns the transport-side read loop; the orchestrator
/// only starts it, stops it, and exchanges playback state with it.
#[async_trait]
pub trait InputSource: Send + Sync {
    /// Run the inbound handler until the stream ends
    async fn handle(&self) -> Result<(), PortError>;

    /// Stop the inbound handler and release the channel
    async fn stop(&self) -> Result<(), PortError>;

    /// Orchestrator signal: assistant audio started or stopped playing
    fn set_audio_playing(&self, playing: bool);

    /// Whether assistant audio is currently being played to the user
    fn is_audio_playing(&self) -> bool;

    /// Whether the welcome message finished playing (interim transcripts
    /// arriving before that are ignored)
    fn welcome_message_played(&self) -> bool;

    /// Transport stream id once the media stream is established
    fn stream_id(&self) -> Option<String>;
}
