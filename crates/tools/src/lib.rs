//! External tool invocation
//!
//! The orchestrator's tool-call branch delegates here: a [`ToolInvoker`]
//! resolves the named tool from configuration and performs the HTTP call.

pub mod webhook;

pub use webhook::ToolInvoker;

use async_trait::async_trait;
use thiserror::Error;
use voxflow_core::ToolCallRequest;

/// Tool execution errors
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Timeout")]
    Timeout,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<reqwest::Error> for ToolError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ToolError::Timeout
        } else {
            ToolError::ExecutionFailed(err.to_string())
        }
    }
}

/// Tool execution boundary
///
/// Implement this to integrate a different tool backend (in-process tools,
/// MCP, a message bus); [`ToolInvoker`] is the webhook-backed implementation.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Execute the call and return the tool's textual result
    async fn invoke(&self, call: &ToolCallRequest) -> Result<String, ToolError>;
}
