//! Reasoning agent stream types
//!
//! Common shapes for partial-output events produced by any reasoning agent
//! implementation, and the completion-check verdict used for proactive
//! hangup decisions.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One partial-output event from a reasoning agent stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentChunk {
    /// Text delta (may be empty on the terminal chunk)
    pub text: String,
    /// Last event of this generation
    #[serde(default)]
    pub end_of_stream: bool,
    /// First-token latency, reported once per generation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    /// Set when the agent wants an external tool invoked instead of
    /// continuing to stream text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCallRequest>,
    /// Canonical complete response, reported on the terminal chunk by
    /// providers that buffer internally. Falls back to the concatenated
    /// deltas when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_text: Option<String>,
}

impl AgentChunk {
    /// Intermediate text delta
    pub fn text(delta: impl Into<String>) -> Self {
        Self {
            text: delta.into(),
            end_of_stream: false,
            latency_ms: None,
            tool_call: None,
            full_text: None,
        }
    }

    /// Terminal chunk, optionally carrying a final delta
    pub fn final_chunk(delta: impl Into<String>) -> Self {
        Self {
            text: delta.into(),
            end_of_stream: true,
            latency_ms: None,
            tool_call: None,
            full_text: None,
        }
    }

    /// Tool-call event; suspends normal streaming
    pub fn tool_call(call: ToolCallRequest) -> Self {
        Self {
            text: String::new(),
            end_of_stream: false,
            latency_ms: None,
            tool_call: Some(call),
            full_text: None,
        }
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = Some(latency_ms);
        self
    }

    /// Attach the canonical full response to a terminal chunk
    pub fn with_full_text(mut self, full_text: impl Into<String>) -> Self {
        self.full_text = Some(full_text.into());
        self
    }
}

/// A tool invocation requested by the agent mid-generation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Call id, echoed back on the tool-result history entry
    pub id: String,
    /// Registered tool name
    pub name: String,
    /// Arguments as parsed by the agent implementation
    #[serde(default)]
    pub arguments: HashMap<String, serde_json::Value>,
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: HashMap::new(),
        }
    }

    pub fn with_argument(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.arguments.insert(key.into(), value);
        self
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.arguments.get(key).and_then(|v| v.as_str())
    }

    /// History-friendly rendering of the call
    pub fn to_history_content(&self) -> String {
        serde_json::json!({
            "id": self.id,
            "name": self.name,
            "arguments": self.arguments,
        })
        .to_string()
    }
}

/// Answer to the "should this call end?" completion question
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionVerdict {
    pub hangup: bool,
}

impl CompletionVerdict {
    pub fn hangup() -> Self {
        Self { hangup: true }
    }

    pub fn keep_going() -> Self {
        Self { hangup: false }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_ctors() {
        let chunk = AgentChunk::text("Hel").with_latency(120);
        assert!(!chunk.end_of_stream);
        assert_eq!(chunk.latency_ms, Some(120));

        let last = AgentChunk::final_chunk("");
        assert!(last.end_of_stream);
        assert!(last.tool_call.is_none());
    }

    #[test]
    fn test_tool_call_arguments() {
        let call = ToolCallRequest::new("call-1", "book_slot")
            .with_argument("city", serde_json::json!("Mumbai"));

        assert_eq!(call.get_str("city"), Some("Mumbai"));
        assert!(call.to_history_content().contains("book_slot"));
    }
}
