//! Capability ports
//!
//! Narrow interfaces the orchestrator depends on. Concrete transcription,
//! synthesis, reasoning and transport providers live outside this workspace
//! and are swappable behind these traits; the orchestrator never constructs
//! a provider itself.

mod encoder;
mod input;
mod output;
mod reasoning;
mod synthesis;
mod transcription;

pub use encoder::UtteranceEncoder;
pub use input::InputSource;
pub use output::OutputSink;
pub use reasoning::ReasoningAgent;
pub use synthesis::Synthesizer;
pub use transcription::{Transcriber, TranscriberEvent};
