//! Error types for the conversation orchestrator

use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type shared across the workspace
#[derive(Error, Debug)]
pub enum Error {
    // Capability port failures (provider-side)
    #[error("Port error: {0}")]
    Port(#[from] PortError),

    // Routing / cache failures
    #[error("Routing error: {0}")]
    Routing(String),

    // Tool invocation failures
    #[error("Tool error: {0}")]
    Tool(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Failures surfaced by capability port implementations
#[derive(Error, Debug)]
pub enum PortError {
    #[error("Input source error: {0}")]
    Input(String),

    #[error("Transcriber error: {0}")]
    Transcriber(String),

    #[error("Agent error: {0}")]
    Agent(String),

    #[error("Synthesizer error: {0}")]
    Synthesizer(String),

    #[error("Output sink error: {0}")]
    Output(String),

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Timeout after {0}ms")]
    Timeout(u64),
}

impl Error {
    /// Create a generic error from a string
    pub fn other<S: Into<String>>(msg: S) -> Self {
        Error::Other(msg.into())
    }

    pub fn routing<S: Into<String>>(msg: S) -> Self {
        Error::Routing(msg.into())
    }

    pub fn tool<S: Into<String>>(msg: S) -> Self {
        Error::Tool(msg.into())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}
