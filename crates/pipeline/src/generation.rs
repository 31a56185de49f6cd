//! Generation driver
//!
//! Runs as its own task per turn so the orchestrator stays responsive to
//! barge-ins. The driver works on a snapshot of the history and never mutates
//! shared state; the completed exchange is reported back over the session
//! event channel and committed by the orchestrator in one step. Aborting the
//! task mid-turn therefore leaves history untouched.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;

use voxflow_core::{
    DataPacket, PacketMeta, ReasoningAgent, Synthesizer, ToolCallRequest, Turn,
};
use voxflow_tools::ToolExecutor;

use crate::events::SessionEvent;
use crate::sequence::SequenceTracker;

/// One regeneration after a tool call; a second tool call fails the turn.
const MAX_TOOL_REENTRIES: usize = 1;

/// Filtered path from text fragments into the synthesizer.
///
/// Drops packets whose sequence id is no longer live and everything after
/// session end; out-of-band packets always pass.
#[derive(Clone)]
pub(crate) struct SynthesizerFeed {
    synthesizer: Arc<dyn Synthesizer>,
    sequences: Arc<SequenceTracker>,
    ended: Arc<AtomicBool>,
}

impl SynthesizerFeed {
    pub fn new(
        synthesizer: Arc<dyn Synthesizer>,
        sequences: Arc<SequenceTracker>,
        ended: Arc<AtomicBool>,
    ) -> Self {
        Self {
            synthesizer,
            sequences,
            ended,
        }
    }

    pub async fn send_text(&self, text: &str, meta: PacketMeta) {
        if self.ended.load(Ordering::SeqCst) {
            return;
        }
        if !meta.is_out_of_band() && !self.sequences.is_live(meta.sequence_id) {
            tracing::debug!(
                sequence_id = meta.sequence_id,
                "Dropping stale text before synthesis"
            );
            return;
        }
        if let Err(e) = self
            .synthesizer
            .push(DataPacket::text(text, meta))
            .await
        {
            tracing::warn!(error = %e, "Synthesizer push failed");
        }
    }
}

/// Everything one generation task needs, captured at spawn time
pub(crate) struct GenerationContext {
    pub agent: Arc<dyn ReasoningAgent>,
    pub tools: Arc<dyn ToolExecutor>,
    /// History snapshot, system prompt included
    pub snapshot: Vec<Turn>,
    /// Finalized user utterance for this turn
    pub utterance: String,
    /// Metadata minted for this turn; reused for every fragment
    pub meta: PacketMeta,
    /// Stream fragments to the synthesizer, or send the whole response at end
    pub stream_responses: bool,
    /// Ask the agent afterwards whether the call should end
    pub completion_prompt: Option<String>,
    pub feed: SynthesizerFeed,
    pub events: mpsc::Sender<SessionEvent>,
}

/// Drive one turn of generation to completion (or failure/abort)
pub(crate) async fn drive_generation(ctx: GenerationContext) {
    let mut messages = ctx.snapshot;
    messages.push(Turn::user(ctx.utterance.clone()));

    // Tool call/result pairs to commit alongside the exchange
    let mut tool_turns: Vec<Turn> = Vec::new();
    let mut reentries = 0usize;
    let mut first_latency: Option<u64> = None;

    loop {
        let mut stream = ctx.agent.generate(messages.clone(), ctx.meta.clone());
        let mut response = String::new();
        let mut pending_tool: Option<ToolCallRequest> = None;
        let mut end_of_stream = false;
        let mut full_text: Option<String> = None;

        while let Some(item) = stream.next().await {
            let chunk = match item {
                Ok(chunk) => chunk,
                Err(e) => {
                    tracing::error!(error = %e, "Agent stream error, abandoning turn");
                    let _ = ctx
                        .events
                        .send(SessionEvent::TurnFailed {
                            reason: e.to_string(),
                        })
                        .await;
                    return;
                },
            };

            if let Some(latency) = chunk.latency_ms {
                first_latency.get_or_insert(latency);
            }
            if let Some(call) = chunk.tool_call {
                pending_tool = Some(call);
                break;
            }

            end_of_stream = chunk.end_of_stream;
            if chunk.full_text.is_some() {
                full_text = chunk.full_text.clone();
            }
            response.push_str(&chunk.text);

            if ctx.stream_responses {
                let text = if end_of_stream {
                    trim_stop_words(&chunk.text).to_string()
                } else {
                    chunk.text
                };
                if !text.is_empty() || end_of_stream {
                    let meta = ctx.meta.clone().with_end_of_stream(end_of_stream);
                    ctx.feed.send_text(&text, meta).await;
                }
            }

            if end_of_stream {
                break;
            }
        }

        if let Some(call) = pending_tool {
            if reentries >= MAX_TOOL_REENTRIES {
                tracing::warn!(tool = %call.name, "Tool re-entry limit reached");
                let _ = ctx
                    .events
                    .send(SessionEvent::TurnFailed {
                        reason: format!("tool re-entry limit reached at '{}'", call.name),
                    })
                    .await;
                return;
            }
            reentries += 1;

            match ctx.tools.invoke(&call).await {
                Ok(result) => {
                    let call_turn = Turn::assistant(call.to_history_content());
                    let result_turn = Turn::tool(result, call.id.clone());
                    messages.push(call_turn.clone());
                    messages.push(result_turn.clone());
                    tool_turns.push(call_turn);
                    tool_turns.push(result_turn);
                    // Re-invoke generation with the augmented history
                    continue;
                },
                Err(e) => {
                    tracing::error!(tool = %call.name, error = %e, "Tool invocation failed");
                    let _ = ctx
                        .events
                        .send(SessionEvent::TurnFailed {
                            reason: e.to_string(),
                        })
                        .await;
                    return;
                },
            }
        }

        if !end_of_stream {
            // Stream ran dry without a terminal event
            let _ = ctx
                .events
                .send(SessionEvent::TurnFailed {
                    reason: "agent stream ended without end_of_stream".to_string(),
                })
                .await;
            return;
        }

        let assistant_text = full_text.unwrap_or_else(|| trim_stop_words(&response).to_string());

        if !ctx.stream_responses {
            let meta = ctx.meta.clone().with_end_of_stream(true);
            ctx.feed.send_text(&assistant_text, meta).await;
        }

        let mut turns = tool_turns;
        turns.push(Turn::user(ctx.utterance.clone()));
        turns.push(Turn::assistant(assistant_text.clone()));
        let _ = ctx
            .events
            .send(SessionEvent::ExchangeCompleted {
                turns,
                latency_ms: first_latency,
            })
            .await;

        if let Some(prompt) = &ctx.completion_prompt {
            messages.push(Turn::assistant(assistant_text));
            match ctx.agent.check_for_completion(&messages, prompt).await {
                Ok(verdict) if verdict.hangup => {
                    tracing::info!("Completion check requested hangup");
                    let _ = ctx.events.send(SessionEvent::HangupRequested).await;
                },
                Ok(_) => {},
                Err(e) => tracing::warn!(error = %e, "Completion check failed"),
            }
        }

        return;
    }
}

/// Strip a trailing role label the model sometimes echoes on its last chunk
fn trim_stop_words(text: &str) -> &str {
    let len = text.len();
    if let Some(tail) = len.checked_sub(5).and_then(|i| text.get(i..)) {
        if tail.eq_ignore_ascii_case("user:") {
            return &text[..len - 5];
        }
    }
    if let Some(tail) = len.checked_sub(4).and_then(|i| text.get(i..)) {
        if tail.eq_ignore_ascii_case("user") {
            return &text[..len - 4];
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trim_stop_words() {
        assert_eq!(trim_stop_words("See you soon. user:"), "See you soon. ");
        assert_eq!(trim_stop_words("See you soon. User"), "See you soon. ");
        assert_eq!(trim_stop_words("Talk to the user"), "Talk to the ");
        assert_eq!(trim_stop_words("Hello there."), "Hello there.");
        assert_eq!(trim_stop_words(""), "");
    }
}
