//! Integration scenarios for the turn orchestrator
//!
//! Drives a full session against scripted mock ports: cached routing,
//! barge-in interruption, streamed generation with history commits,
//! tool-call atomicity, and silence-based hangup.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_stream::wrappers::ReceiverStream;

use voxflow_config::{AgentRouteConfig, RouteConfig, RouteResponse, Settings};
use voxflow_core::{
    AgentChunk, CompletionVerdict, DataPacket, InputSource, OutputSink, PacketMeta, PacketOrigin,
    PortError, ReasoningAgent, Synthesizer, ToolCallRequest, Transcriber, TranscriberEvent, Turn,
    TurnRole,
};
use voxflow_pipeline::{
    AgentBindings, OrchestratorPorts, SessionSummary, TurnOrchestrator,
};
use voxflow_routing::HashEncoder;
use voxflow_tools::{ToolError, ToolExecutor};

// ---------------------------------------------------------------------------
// Mock ports
// ---------------------------------------------------------------------------

struct MockInput {
    audio_playing: AtomicBool,
    stopped: AtomicBool,
    welcome_played: AtomicBool,
}

impl MockInput {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            audio_playing: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            welcome_played: AtomicBool::new(true),
        })
    }

    fn was_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InputSource for MockInput {
    async fn handle(&self) -> Result<(), PortError> {
        while !self.stopped.load(Ordering::SeqCst) {
            sleep(Duration::from_millis(10)).await;
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), PortError> {
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn set_audio_playing(&self, playing: bool) {
        self.audio_playing.store(playing, Ordering::SeqCst);
    }

    fn is_audio_playing(&self) -> bool {
        self.audio_playing.load(Ordering::SeqCst)
    }

    fn welcome_message_played(&self) -> bool {
        self.welcome_played.load(Ordering::SeqCst)
    }

    fn stream_id(&self) -> Option<String> {
        Some("stream-1".to_string())
    }
}

/// Emits a scripted series of (delay, event) pairs, then reports its
/// connection closed once the orchestrator toggles it at teardown.
struct MockTranscriber {
    script: Mutex<Option<Vec<(u64, TranscriberEvent)>>>,
    toggled: AtomicBool,
}

impl MockTranscriber {
    fn new(script: Vec<(u64, TranscriberEvent)>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(Some(script)),
            toggled: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl Transcriber for MockTranscriber {
    async fn run(&self, events: mpsc::Sender<TranscriberEvent>) -> Result<(), PortError> {
        let script = self.script.lock().unwrap().take().unwrap_or_default();
        for (delay_ms, event) in script {
            sleep(Duration::from_millis(delay_ms)).await;
            if events.send(event).await.is_err() {
                return Ok(());
            }
        }
        while !self.toggled.load(Ordering::SeqCst) {
            sleep(Duration::from_millis(10)).await;
        }
        let _ = events
            .send(TranscriberEvent::ConnectionClosed { duration_secs: 1.5 })
            .await;
        Ok(())
    }

    async fn toggle_connection(&self) -> Result<(), PortError> {
        self.toggled.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Plays back one scripted chunk list per `generate` call.
struct MockAgent {
    scripts: Mutex<VecDeque<Vec<AgentChunk>>>,
    chunk_delay_ms: u64,
    generate_calls: AtomicUsize,
    completion_checks: AtomicUsize,
    completion_hangup: bool,
}

impl MockAgent {
    fn new(scripts: Vec<Vec<AgentChunk>>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            chunk_delay_ms: 0,
            generate_calls: AtomicUsize::new(0),
            completion_checks: AtomicUsize::new(0),
            completion_hangup: false,
        })
    }

    fn slow(scripts: Vec<Vec<AgentChunk>>, chunk_delay_ms: u64) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            chunk_delay_ms,
            generate_calls: AtomicUsize::new(0),
            completion_checks: AtomicUsize::new(0),
            completion_hangup: false,
        })
    }

    fn hanging_up(scripts: Vec<Vec<AgentChunk>>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            chunk_delay_ms: 0,
            completion_hangup: true,
            generate_calls: AtomicUsize::new(0),
            completion_checks: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.generate_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReasoningAgent for MockAgent {
    fn generate(
        &self,
        _messages: Vec<Turn>,
        _meta: PacketMeta,
    ) -> BoxStream<'static, Result<AgentChunk, PortError>> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        let chunks = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| vec![AgentChunk::final_chunk("")]);
        let delay = self.chunk_delay_ms;

        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(async move {
            for chunk in chunks {
                if delay > 0 {
                    sleep(Duration::from_millis(delay)).await;
                }
                if tx.send(Ok(chunk)).await.is_err() {
                    return;
                }
            }
        });
        Box::pin(ReceiverStream::new(rx))
    }

    async fn check_for_completion(
        &self,
        _history: &[Turn],
        _prompt: &str,
    ) -> Result<CompletionVerdict, PortError> {
        self.completion_checks.fetch_add(1, Ordering::SeqCst);
        Ok(if self.completion_hangup {
            CompletionVerdict::hangup()
        } else {
            CompletionVerdict::keep_going()
        })
    }

    fn model_name(&self) -> &str {
        "mock-agent"
    }
}

/// Echoes every pushed text packet back as one audio packet with the same
/// metadata, and lets tests inject arbitrary packets into its stream.
struct MockSynth {
    pushed: Mutex<Vec<DataPacket>>,
    characters: AtomicUsize,
    interruptions: AtomicUsize,
    cleaned: AtomicBool,
    audio_tx: mpsc::Sender<DataPacket>,
    audio_rx: Mutex<Option<mpsc::Receiver<DataPacket>>>,
}

impl MockSynth {
    fn new() -> Arc<Self> {
        let (audio_tx, audio_rx) = mpsc::channel(64);
        Arc::new(Self {
            pushed: Mutex::new(Vec::new()),
            characters: AtomicUsize::new(0),
            interruptions: AtomicUsize::new(0),
            cleaned: AtomicBool::new(false),
            audio_tx,
            audio_rx: Mutex::new(Some(audio_rx)),
        })
    }

    fn pushed_texts(&self) -> Vec<String> {
        self.pushed
            .lock()
            .unwrap()
            .iter()
            .filter_map(|p| p.data.as_text().map(|t| t.to_string()))
            .collect()
    }

    fn pushed_metas(&self) -> Vec<PacketMeta> {
        self.pushed.lock().unwrap().iter().map(|p| p.meta.clone()).collect()
    }

    /// Inject a raw audio packet into the synthesizer's output stream
    async fn inject(&self, packet: DataPacket) {
        let _ = self.audio_tx.send(packet).await;
    }
}

#[async_trait]
impl Synthesizer for MockSynth {
    async fn push(&self, packet: DataPacket) -> Result<(), PortError> {
        self.characters
            .fetch_add(packet.data.char_count(), Ordering::SeqCst);
        let audio = DataPacket::audio(vec![0u8; 160], packet.meta.clone());
        self.pushed.lock().unwrap().push(packet);
        let _ = self.audio_tx.send(audio).await;
        Ok(())
    }

    fn audio_stream(&self) -> BoxStream<'static, DataPacket> {
        let rx = self
            .audio_rx
            .lock()
            .unwrap()
            .take()
            .expect("audio_stream taken once");
        Box::pin(ReceiverStream::new(rx))
    }

    fn engine(&self) -> &str {
        "mock-synth"
    }

    fn synthesized_characters(&self) -> usize {
        self.characters.load(Ordering::SeqCst)
    }

    async fn monitor_connection(&self) -> Result<(), PortError> {
        std::future::pending::<()>().await;
        Ok(())
    }

    async fn handle_interruption(&self) {
        self.interruptions.fetch_add(1, Ordering::SeqCst);
    }

    async fn cleanup(&self) {
        self.cleaned.store(true, Ordering::SeqCst);
    }
}

struct MockSink {
    packets: Mutex<Vec<DataPacket>>,
    interruptions: AtomicUsize,
    hangup_sent: AtomicBool,
    init_acks: AtomicUsize,
}

impl MockSink {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            packets: Mutex::new(Vec::new()),
            interruptions: AtomicUsize::new(0),
            hangup_sent: AtomicBool::new(false),
            init_acks: AtomicUsize::new(0),
        })
    }

    fn received(&self) -> Vec<PacketMeta> {
        self.packets.lock().unwrap().iter().map(|p| p.meta.clone()).collect()
    }
}

#[async_trait]
impl OutputSink for MockSink {
    async fn handle(&self, packet: DataPacket) -> Result<(), PortError> {
        self.packets.lock().unwrap().push(packet);
        Ok(())
    }

    async fn handle_interruption(&self) -> Result<(), PortError> {
        self.interruptions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn provider(&self) -> &str {
        "mock-sink"
    }

    fn set_hangup_sent(&self) {
        self.hangup_sent.store(true, Ordering::SeqCst);
    }

    async fn send_init_ack(&self) -> Result<(), PortError> {
        self.init_acks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct StubTools {
    result: Result<String, String>,
    calls: AtomicUsize,
}

impl StubTools {
    fn ok(result: &str) -> Arc<Self> {
        Arc::new(Self {
            result: Ok(result.to_string()),
            calls: AtomicUsize::new(0),
        })
    }

    fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            result: Err(message.to_string()),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ToolExecutor for StubTools {
    async fn invoke(&self, _call: &ToolCallRequest) -> Result<String, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.result {
            Ok(text) => Ok(text.clone()),
            Err(message) => Err(ToolError::ExecutionFailed(message.clone())),
        }
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Session {
    input: Arc<MockInput>,
    synth: Arc<MockSynth>,
    sink: Arc<MockSink>,
    events: mpsc::Sender<voxflow_pipeline::SessionEvent>,
    handle: tokio::task::JoinHandle<SessionSummary>,
}

impl Session {
    async fn finish(self) -> SessionSummary {
        let _ = self
            .events
            .send(voxflow_pipeline::SessionEvent::HangupRequested)
            .await;
        timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("session did not end in time")
            .expect("session task panicked")
    }

    async fn join(self) -> SessionSummary {
        timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("session did not end in time")
            .expect("session task panicked")
    }
}

fn start_session(
    settings: Settings,
    transcriber: Arc<MockTranscriber>,
    agent: Arc<MockAgent>,
    tools: Option<Arc<dyn ToolExecutor>>,
) -> Session {
    let input = MockInput::new();
    let synth = MockSynth::new();
    let sink = MockSink::new();

    let ports = OrchestratorPorts {
        input: input.clone(),
        transcriber: transcriber.clone(),
        synthesizer: synth.clone(),
        output: sink.clone(),
    };

    let mut orchestrator = TurnOrchestrator::new(settings, ports, AgentBindings::single(agent))
        .with_system_prompt("You are a concise voice assistant.")
        .with_encoder(Arc::new(HashEncoder::default()));
    if let Some(tools) = tools {
        orchestrator = orchestrator.with_tools(tools);
    }

    let events = orchestrator.event_sender();
    let handle = tokio::spawn(orchestrator.run());

    Session {
        input,
        synth,
        sink,
        events,
        handle,
    }
}

fn final_transcript(delay_ms: u64, content: &str) -> (u64, TranscriberEvent) {
    (
        delay_ms,
        TranscriberEvent::Final {
            content: content.to_string(),
        },
    )
}

fn interim(delay_ms: u64, content: &str) -> (u64, TranscriberEvent) {
    (
        delay_ms,
        TranscriberEvent::Interim {
            content: content.to_string(),
        },
    )
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

/// A route above threshold answers from cache: `cached = true`, agent never
/// invoked.
#[tokio::test]
async fn test_cached_route_skips_agent() {
    let mut settings = Settings::default();
    settings.routing.routes.push(RouteConfig {
        route_name: "lights_on".to_string(),
        score_threshold: 0.8,
        utterances: vec!["turn on the lights".to_string()],
        response: RouteResponse::PerUtterance(vec!["Lights are now on.".to_string()]),
    });

    let transcriber = MockTranscriber::new(vec![final_transcript(20, "turn on the lights")]);
    let agent = MockAgent::new(vec![vec![AgentChunk::final_chunk("should not run")]]);
    let session = start_session(settings, transcriber, agent.clone(), None);

    sleep(Duration::from_millis(300)).await;
    let synth = session.synth.clone();
    let sink = session.sink.clone();
    let summary = session.finish().await;

    assert_eq!(agent.calls(), 0, "cache hit must not invoke the agent");

    let texts = synth.pushed_texts();
    assert_eq!(texts, vec!["Lights are now on.".to_string()]);

    let metas = synth.pushed_metas();
    assert!(metas[0].cached);
    assert!(metas[0].end_of_stream);
    assert_eq!(metas[0].origin, PacketOrigin::RouteCache);

    // The synthesized audio reached the sink with cache metadata intact
    let delivered = sink.received();
    assert!(delivered.iter().any(|m| m.cached && m.origin == PacketOrigin::RouteCache));
    assert_eq!(summary.synthesized_characters, "Lights are now on.".len());
}

/// Five words mid-playback with threshold 3: playback stops, the turn
/// counter increments, and stale packets never reach the sink.
#[tokio::test]
async fn test_barge_in_stops_playback_and_bumps_turn() {
    let mut settings = Settings::default();
    settings.conversation.interruption_word_threshold = 3;

    let story: Vec<AgentChunk> = (0..12)
        .map(|i| AgentChunk::text(format!("part{} ", i)))
        .chain(std::iter::once(AgentChunk::final_chunk("the end.")))
        .collect();
    let agent = MockAgent::slow(vec![story], 40);

    let transcriber = MockTranscriber::new(vec![
        final_transcript(20, "tell me a long story"),
        interim(280, "no wait stop right there"),
    ]);
    let session = start_session(settings, transcriber, agent.clone(), None);

    sleep(Duration::from_millis(500)).await;

    // Emit a stale packet after the reset; the live-sequence filter must
    // drop it before the sink.
    let stale_meta = PacketMeta::new(999, 0).with_origin(PacketOrigin::Synthesizer);
    session
        .synth
        .inject(DataPacket::audio(vec![1u8; 32], stale_meta))
        .await;
    sleep(Duration::from_millis(150)).await;

    let synth = session.synth.clone();
    let sink = session.sink.clone();
    let summary = session.finish().await;

    assert_eq!(summary.turn_count, 1, "barge-in bumps the turn counter once");
    assert!(synth.interruptions.load(Ordering::SeqCst) >= 1);
    assert!(sink.interruptions.load(Ordering::SeqCst) >= 1);
    assert!(
        !sink.received().iter().any(|m| m.sequence_id == 999),
        "stale sequence ids never reach the sink"
    );

    // The aborted generation never committed its half-spoken exchange
    assert!(!summary
        .messages
        .iter()
        .any(|t| t.role == TurnRole::Assistant && t.content.contains("part")));
}

/// Streamed fragments go to the synthesizer as they arrive; history gets
/// exactly one user and one assistant entry with the canonical full text.
#[tokio::test]
async fn test_streaming_exchange_commits_full_text() {
    let settings = Settings::default();

    let agent = MockAgent::new(vec![vec![
        AgentChunk::text("Hel"),
        AgentChunk::final_chunk("lo ").with_full_text("Hello there."),
    ]]);
    let transcriber = MockTranscriber::new(vec![final_transcript(20, "hi who is this")]);
    let session = start_session(settings, transcriber, agent.clone(), None);

    sleep(Duration::from_millis(300)).await;
    let synth = session.synth.clone();
    let summary = session.finish().await;

    assert_eq!(agent.calls(), 1);
    assert_eq!(synth.pushed_texts(), vec!["Hel".to_string(), "lo ".to_string()]);

    let users: Vec<&Turn> = summary
        .messages
        .iter()
        .filter(|t| t.role == TurnRole::User)
        .collect();
    let assistants: Vec<&Turn> = summary
        .messages
        .iter()
        .filter(|t| t.role == TurnRole::Assistant)
        .collect();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].content, "hi who is this");
    assert_eq!(assistants.len(), 1);
    assert_eq!(assistants[0].content, "Hello there.");
}

/// Non-streaming mode pushes the whole response once at end of stream.
#[tokio::test]
async fn test_non_streaming_pushes_once() {
    let mut settings = Settings::default();
    settings.conversation.stream_responses = false;

    let agent = MockAgent::new(vec![vec![
        AgentChunk::text("Hello "),
        AgentChunk::final_chunk("there."),
    ]]);
    let transcriber = MockTranscriber::new(vec![final_transcript(20, "hello")]);
    let session = start_session(settings, transcriber, agent, None);

    sleep(Duration::from_millis(300)).await;
    let synth = session.synth.clone();
    let summary = session.finish().await;

    assert_eq!(synth.pushed_texts(), vec!["Hello there.".to_string()]);
    assert!(summary
        .messages
        .iter()
        .any(|t| t.role == TurnRole::Assistant && t.content == "Hello there."));
}

/// A successful tool call commits exactly the call/result pair plus the
/// exchange; a failed one commits nothing.
#[tokio::test]
async fn test_tool_call_history_atomicity() {
    let settings = Settings::default();

    let call = ToolCallRequest::new("call-1", "check_slots")
        .with_argument("city", serde_json::json!("Mumbai"));
    let agent = MockAgent::new(vec![
        vec![AgentChunk::tool_call(call)],
        vec![AgentChunk::final_chunk("There is a slot at 10 AM.")],
    ]);
    let transcriber = MockTranscriber::new(vec![final_transcript(20, "any slots tomorrow")]);
    let tools = StubTools::ok("{\"slots\":[\"10:00\"]}");
    let session = start_session(
        settings,
        transcriber,
        agent.clone(),
        Some(tools.clone() as Arc<dyn ToolExecutor>),
    );

    sleep(Duration::from_millis(400)).await;
    let summary = session.finish().await;

    assert_eq!(agent.calls(), 2, "tool call re-invokes generation once");
    assert_eq!(tools.calls.load(Ordering::SeqCst), 1);

    let tool_entries: Vec<&Turn> = summary
        .messages
        .iter()
        .filter(|t| t.role == TurnRole::Tool)
        .collect();
    assert_eq!(tool_entries.len(), 1);
    assert_eq!(tool_entries[0].tool_call_id.as_deref(), Some("call-1"));

    // call entry directly precedes its result
    let idx = summary
        .messages
        .iter()
        .position(|t| t.role == TurnRole::Tool)
        .unwrap();
    assert_eq!(summary.messages[idx - 1].role, TurnRole::Assistant);
    assert!(summary.messages[idx - 1].content.contains("check_slots"));
    assert!(summary
        .messages
        .iter()
        .any(|t| t.role == TurnRole::Assistant && t.content == "There is a slot at 10 AM."));
}

#[tokio::test]
async fn test_failed_tool_call_commits_nothing() {
    let settings = Settings::default();

    let call = ToolCallRequest::new("call-1", "check_slots");
    let agent = MockAgent::new(vec![vec![AgentChunk::tool_call(call)]]);
    let transcriber = MockTranscriber::new(vec![final_transcript(20, "any slots tomorrow")]);
    let tools = StubTools::failing("upstream 500");
    let session = start_session(
        settings,
        transcriber,
        agent,
        Some(tools as Arc<dyn ToolExecutor>),
    );

    sleep(Duration::from_millis(300)).await;
    let summary = session.finish().await;

    // System prompt only: the abandoned turn left no trace
    assert_eq!(summary.messages.len(), 1);
    assert_eq!(summary.messages[0].role, TurnRole::System);
}

/// Prolonged mutual silence: one still-there prompt, then orchestrated
/// hangup once the longer threshold passes.
#[tokio::test]
async fn test_silence_hangup_ends_session() {
    let mut settings = Settings::default();
    settings.conversation.welcome_message = Some("Hello, how can I help?".to_string());
    settings.conversation.monitor_tick_secs = 0.05;
    settings.conversation.still_there_after_secs = 0.15;
    settings.conversation.hangup_after_silence_secs = 0.5;

    let transcriber = MockTranscriber::new(vec![]);
    let agent = MockAgent::new(vec![]);
    let session = start_session(settings, transcriber, agent, None);

    let input = session.input.clone();
    let sink = session.sink.clone();
    let summary = session.join().await;

    assert!(summary.ended_by_assistant);
    assert!(input.was_stopped());
    assert!(sink
        .received()
        .iter()
        .any(|m| m.origin == PacketOrigin::StillThere));
    // Welcome played before the silence clock started
    assert!(sink
        .received()
        .iter()
        .any(|m| m.origin == PacketOrigin::Welcome && m.cached));
    assert_eq!(summary.transcription_secs, 1.5);
}

/// A hangup message is spoken before teardown and lands in the transcript.
#[tokio::test]
async fn test_hangup_message_is_played_and_recorded() {
    let mut settings = Settings::default();
    settings.conversation.hangup_message = Some("Goodbye, talk soon!".to_string());

    let transcriber = MockTranscriber::new(vec![]);
    let agent = MockAgent::new(vec![]);
    let session = start_session(settings, transcriber, agent, None);

    sleep(Duration::from_millis(100)).await;
    let synth = session.synth.clone();
    let sink = session.sink.clone();
    let summary = session.finish().await;

    assert!(summary.ended_by_assistant);
    assert!(sink.hangup_sent.load(Ordering::SeqCst));
    assert!(synth.cleaned.load(Ordering::SeqCst), "teardown releases the synthesizer");
    assert!(sink
        .received()
        .iter()
        .any(|m| m.origin == PacketOrigin::Hangup));
    assert_eq!(
        summary.messages.last().map(|t| t.content.as_str()),
        Some("Goodbye, talk soon!")
    );
}

/// The completion check can end the call right after an exchange.
#[tokio::test]
async fn test_llm_completion_check_triggers_hangup() {
    let mut settings = Settings::default();
    settings.conversation.use_llm_for_hangup = true;

    let agent = MockAgent::hanging_up(vec![vec![AgentChunk::final_chunk(
        "Thanks for calling, bye!",
    )]]);
    let transcriber = MockTranscriber::new(vec![final_transcript(20, "that is all thanks")]);
    let session = start_session(settings, transcriber, agent.clone(), None);

    let summary = session.join().await;

    assert_eq!(agent.completion_checks.load(Ordering::SeqCst), 1);
    assert!(summary.ended_by_assistant);
    assert!(summary
        .messages
        .iter()
        .any(|t| t.role == TurnRole::Assistant && t.content == "Thanks for calling, bye!"));
}

/// Init context rewrites the system prompt and the pending welcome message,
/// acknowledges, then greets.
#[tokio::test]
async fn test_init_event_rewrites_context() {
    let mut settings = Settings::default();
    settings.conversation.web_initiated = true;
    settings.conversation.welcome_message = Some("Hi {name}, welcome back!".to_string());

    let transcriber = MockTranscriber::new(vec![]);
    let agent = MockAgent::new(vec![]);

    let input = MockInput::new();
    let synth = MockSynth::new();
    let sink = MockSink::new();
    let ports = OrchestratorPorts {
        input: input.clone(),
        transcriber: transcriber.clone(),
        synthesizer: synth.clone(),
        output: sink.clone(),
    };
    let orchestrator =
        TurnOrchestrator::new(settings, ports, AgentBindings::single(agent))
            .with_system_prompt("Assist {name} with their account.");
    let events = orchestrator.event_sender();
    let handle = tokio::spawn(orchestrator.run());

    // No welcome before the init event on a web-initiated session
    sleep(Duration::from_millis(100)).await;
    assert!(synth.pushed_texts().is_empty());

    let mut context = HashMap::new();
    context.insert("name".to_string(), "Priya".to_string());
    let _ = events
        .send(voxflow_pipeline::SessionEvent::InitReceived { context })
        .await;

    sleep(Duration::from_millis(300)).await;
    let _ = events
        .send(voxflow_pipeline::SessionEvent::HangupRequested)
        .await;
    let summary = timeout(Duration::from_secs(5), handle)
        .await
        .expect("session did not end in time")
        .expect("session task panicked");

    assert_eq!(sink.init_acks.load(Ordering::SeqCst), 1);
    assert_eq!(
        synth.pushed_texts(),
        vec!["Hi Priya, welcome back!".to_string()]
    );
    assert_eq!(
        summary.messages[0].content,
        "Assist Priya with their account."
    );
    assert_eq!(summary.messages[1].content, "Hi Priya, welcome back!");
}

/// Short acknowledgements mid-playback do not interrupt.
#[tokio::test]
async fn test_accidental_interruption_is_ignored() {
    let mut settings = Settings::default();
    settings.conversation.interruption_word_threshold = 2;

    let story: Vec<AgentChunk> = (0..10)
        .map(|i| AgentChunk::text(format!("part{} ", i)))
        .chain(std::iter::once(AgentChunk::final_chunk("done.")))
        .collect();
    let agent = MockAgent::slow(vec![story], 40);

    let transcriber = MockTranscriber::new(vec![
        final_transcript(20, "tell me something"),
        interim(250, "yeah okay"),
    ]);
    let session = start_session(settings, transcriber, agent, None);

    sleep(Duration::from_millis(600)).await;
    let summary = session.finish().await;

    assert_eq!(
        summary.turn_count, 0,
        "acknowledgements must not bump the turn counter"
    );
}

/// The classifier routes each utterance to its agent; low-confidence
/// utterances fall back to the default agent. Both share one history.
#[tokio::test]
async fn test_multi_agent_dispatch_by_classifier() {
    let mut settings = Settings::default();
    settings.agents.default_agent = "general".to_string();
    settings.agents.routing.push(AgentRouteConfig {
        agent: "billing".to_string(),
        utterances: vec!["question about my invoice".to_string()],
        score_threshold: 0.8,
    });

    let billing = MockAgent::new(vec![vec![AgentChunk::final_chunk("Billing team here.")]]);
    let general = MockAgent::new(vec![vec![AgentChunk::final_chunk("Happy to help.")]]);
    let mut agents: HashMap<String, Arc<dyn ReasoningAgent>> = HashMap::new();
    agents.insert("billing".to_string(), billing.clone());
    agents.insert("general".to_string(), general.clone());
    let bindings = AgentBindings::new(agents, "general").unwrap();

    let input = MockInput::new();
    let synth = MockSynth::new();
    let sink = MockSink::new();
    let transcriber = MockTranscriber::new(vec![
        final_transcript(20, "question about my invoice"),
        final_transcript(250, "what a lovely afternoon outside"),
    ]);
    let ports = OrchestratorPorts {
        input,
        transcriber,
        synthesizer: synth,
        output: sink,
    };
    let orchestrator = TurnOrchestrator::new(settings, ports, bindings)
        .with_system_prompt("You are a concise voice assistant.")
        .with_encoder(Arc::new(HashEncoder::default()));
    let events = orchestrator.event_sender();
    let handle = tokio::spawn(orchestrator.run());

    sleep(Duration::from_millis(500)).await;
    let _ = events
        .send(voxflow_pipeline::SessionEvent::HangupRequested)
        .await;
    let summary = timeout(Duration::from_secs(5), handle)
        .await
        .expect("session did not end in time")
        .expect("session task panicked");

    assert_eq!(billing.calls(), 1);
    assert_eq!(general.calls(), 1);

    let assistants: Vec<&str> = summary
        .messages
        .iter()
        .filter(|t| t.role == TurnRole::Assistant)
        .map(|t| t.content.as_str())
        .collect();
    assert_eq!(assistants, vec!["Billing team here.", "Happy to help."]);
}

/// Backchannel fillers play while the user is speaking and nothing else is.
#[tokio::test]
async fn test_backchannel_plays_while_user_speaks() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("hmm.wav"), vec![7u8; 64]).unwrap();

    let mut settings = Settings::default();
    settings.conversation.backchannel.enabled = true;
    settings.conversation.backchannel.audio_dir = dir.path().to_string_lossy().into_owned();
    settings.conversation.backchannel.start_delay_secs = 0.05;
    settings.conversation.backchannel.message_gap_secs = 0.05;

    let transcriber = MockTranscriber::new(vec![interim(30, "so I was thinking about")]);
    let agent = MockAgent::new(vec![]);
    let session = start_session(settings, transcriber, agent, None);

    sleep(Duration::from_millis(400)).await;
    let sink = session.sink.clone();
    let _ = session.finish().await;

    assert!(sink
        .received()
        .iter()
        .any(|m| m.origin == PacketOrigin::Backchannel));
}

/// Unreadable backchannel presets disable the feature; the session proceeds.
#[tokio::test]
async fn test_backchannel_setup_failure_degrades() {
    let mut settings = Settings::default();
    settings.conversation.backchannel.enabled = true;
    settings.conversation.backchannel.audio_dir = "/nonexistent/presets".to_string();

    let agent = MockAgent::new(vec![vec![AgentChunk::final_chunk("Still working.")]]);
    let transcriber = MockTranscriber::new(vec![final_transcript(20, "are you there")]);
    let session = start_session(settings, transcriber, agent, None);

    sleep(Duration::from_millis(200)).await;
    let summary = session.finish().await;

    assert!(summary
        .messages
        .iter()
        .any(|t| t.role == TurnRole::Assistant && t.content == "Still working."));
}

/// A provider error mid-turn abandons the exchange and the session keeps
/// listening; the next utterance starts fresh.
#[tokio::test]
async fn test_failed_turn_recovers() {
    let settings = Settings::default();

    // First generation never terminates properly; second succeeds.
    let agent = MockAgent::new(vec![
        vec![AgentChunk::text("half a thou")], // stream ends without end_of_stream
        vec![AgentChunk::final_chunk("All good now.")],
    ]);
    let transcriber = MockTranscriber::new(vec![
        final_transcript(20, "first question"),
        final_transcript(250, "second question"),
    ]);
    let session = start_session(settings, transcriber, agent.clone(), None);

    sleep(Duration::from_millis(500)).await;
    let summary = session.finish().await;

    assert_eq!(agent.calls(), 2);
    let assistants: Vec<&Turn> = summary
        .messages
        .iter()
        .filter(|t| t.role == TurnRole::Assistant)
        .collect();
    assert_eq!(assistants.len(), 1);
    assert_eq!(assistants[0].content, "All good now.");
    assert!(summary
        .messages
        .iter()
        .all(|t| t.content != "half a thou"));
}
