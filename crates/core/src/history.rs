//! Conversation history
//!
//! Ordered role/content transcript mutated only by the orchestrator task.
//! Appends are turn-final: a reader never observes a partial exchange.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role of a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    /// System instructions
    System,
    /// Caller utterance
    User,
    /// Agent response
    Assistant,
    /// Tool invocation result
    Tool,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnRole::System => "system",
            TurnRole::User => "user",
            TurnRole::Assistant => "assistant",
            TurnRole::Tool => "tool",
        }
    }
}

impl std::fmt::Display for TurnRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single turn in the conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Correlates a tool result with the call that produced it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Turn {
    pub fn new(role: TurnRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(TurnRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(TurnRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(TurnRole::Assistant, content)
    }

    /// Tool result turn, tagged with the originating call id
    pub fn tool(content: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Tool,
            content: content.into(),
            timestamp: Utc::now(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    pub fn word_count(&self) -> usize {
        self.content.split_whitespace().count()
    }
}

/// Ordered transcript of the session
///
/// Append-only except for a single context-injection rewrite of the system
/// entry when session context arrives after start. Invariant: the first
/// element, if present, always has role [`TurnRole::System`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationHistory {
    turns: Vec<Turn>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self { turns: Vec::new() }
    }

    /// Start from a system prompt
    pub fn with_system(prompt: impl Into<String>) -> Self {
        Self {
            turns: vec![Turn::system(prompt)],
        }
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// Owned snapshot for a generation task; the task works on the copy and
    /// never touches the shared history.
    pub fn snapshot(&self) -> Vec<Turn> {
        self.turns.clone()
    }

    /// Append a single out-of-band turn (welcome message, hangup message)
    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    /// Append a completed exchange: both entries land together, never one
    /// without the other.
    pub fn push_exchange(&mut self, user: impl Into<String>, assistant: impl Into<String>) {
        self.turns.push(Turn::user(user));
        self.turns.push(Turn::assistant(assistant));
    }

    /// Append a tool call and its result as one atomic pair.
    pub fn push_tool_exchange(&mut self, call: Turn, result: Turn) {
        debug_assert_eq!(call.role, TurnRole::Assistant);
        debug_assert_eq!(result.role, TurnRole::Tool);
        self.turns.push(call);
        self.turns.push(result);
    }

    /// Append a batch of turns committed by a finished generation task.
    pub fn extend(&mut self, turns: impl IntoIterator<Item = Turn>) {
        self.turns.extend(turns);
    }

    /// Rewrite the system entry after asynchronous context arrival. Inserts a
    /// system turn at position 0 when none exists yet.
    pub fn rewrite_system(&mut self, content: impl Into<String>) {
        let content = content.into();
        match self.turns.first_mut() {
            Some(first) if first.role == TurnRole::System => {
                first.content = content;
            },
            _ => self.turns.insert(0, Turn::system(content)),
        }
    }

    /// Rewrite an early assistant entry (the pending welcome message) in
    /// place, if one exists directly after the system prompt.
    pub fn rewrite_welcome(&mut self, content: impl Into<String>) {
        if let Some(turn) = self.turns.get_mut(1) {
            if turn.role == TurnRole::Assistant {
                turn.content = content.into();
            }
        }
    }
}
