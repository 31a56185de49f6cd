//! Turn orchestrator
//!
//! Coordinates transcription, reasoning, synthesis and output delivery for
//! one conversational session.
//!
//! ```text
//! ┌────────────┐   ┌─────────────┐   ┌──────────────────┐   ┌─────────────┐
//! │ InputSource│──▶│ Transcriber │──▶│ TurnOrchestrator │──▶│ Synthesizer │
//! └────────────┘   └─────────────┘   │  (route cache /  │   └──────┬──────┘
//!        ▲                           │  reasoning agent)│          │
//!        │                           └──────────────────┘          ▼
//!        └───────────────── OutputSink ◀─── drain loop ◀── bounded channel
//! ```
//!
//! Everything asynchronous funnels back into the orchestrator task through
//! two channels: transcriber events and internal session events. History and
//! the sequence tracker are mutated only here; reader tasks filter on live
//! sequence ids, which is the authoritative guard against stale audio after
//! a barge-in (cancellation is cooperative and may lag by a few packets).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use parking_lot::Mutex;
use rand::{rngs::StdRng, Rng, SeedableRng};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use voxflow_config::Settings;
use voxflow_core::{
    ConversationHistory, DataPacket, InputSource, OutputSink, PacketMeta, PacketOrigin,
    ReasoningAgent, Synthesizer, Transcriber, TranscriberEvent, Turn, TurnRole, UtteranceEncoder,
};
use voxflow_routing::{AgentRouter, RouteLayer};
use voxflow_tools::{ToolExecutor, ToolInvoker};

use crate::events::SessionEvent;
use crate::generation::{drive_generation, GenerationContext, SynthesizerFeed};
use crate::liveness::LivenessState;
use crate::metrics::{SessionMetrics, SessionSummary};
use crate::sequence::SequenceTracker;
use crate::tasks::TaskRegistry;
use crate::OrchestratorError;

/// Orchestrator state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    /// Waiting for the session to start
    Idle,
    /// Waiting for user speech
    Listening,
    /// Interim transcripts arriving
    Transcribing,
    /// Selecting agent / consulting the route cache
    Routing,
    /// Reasoning agent generating
    Generating,
    /// Forwarding text to the synthesizer
    Synthesizing,
    /// Audio draining to the sink
    Playing,
    /// Terminal
    Ended,
}

/// The capability ports a session runs against
pub struct OrchestratorPorts {
    pub input: Arc<dyn InputSource>,
    pub transcriber: Arc<dyn Transcriber>,
    pub synthesizer: Arc<dyn Synthesizer>,
    pub output: Arc<dyn OutputSink>,
}

/// Reasoning agents bound to this session
pub struct AgentBindings {
    agents: HashMap<String, Arc<dyn ReasoningAgent>>,
    default_agent: String,
}

impl AgentBindings {
    /// Single-agent session
    pub fn single(agent: Arc<dyn ReasoningAgent>) -> Self {
        let mut agents = HashMap::new();
        agents.insert("primary".to_string(), agent);
        Self {
            agents,
            default_agent: "primary".to_string(),
        }
    }

    /// Multi-agent session; the default agent must be among the bindings
    pub fn new(
        agents: HashMap<String, Arc<dyn ReasoningAgent>>,
        default_agent: impl Into<String>,
    ) -> Result<Self, OrchestratorError> {
        let default_agent = default_agent.into();
        if !agents.contains_key(&default_agent) {
            return Err(OrchestratorError::UnknownAgent(default_agent));
        }
        Ok(Self {
            agents,
            default_agent,
        })
    }

    pub fn is_multi_agent(&self) -> bool {
        self.agents.len() > 1
    }

    fn get(&self, name: &str) -> Option<&Arc<dyn ReasoningAgent>> {
        self.agents.get(name)
    }

    fn default_agent(&self) -> &Arc<dyn ReasoningAgent> {
        &self.agents[&self.default_agent]
    }
}

/// The pipeline state machine for one conversational session
pub struct TurnOrchestrator {
    config: Settings,
    ports: OrchestratorPorts,
    agents: AgentBindings,
    route_layer: Option<Arc<RouteLayer>>,
    agent_router: Option<Arc<AgentRouter>>,
    tools: Arc<dyn ToolExecutor>,

    history: ConversationHistory,
    sequences: Arc<SequenceTracker>,
    liveness: Arc<LivenessState>,
    state: OrchestratorState,

    ended: Arc<AtomicBool>,
    hangup_triggered: bool,
    ended_by_assistant: bool,
    transcriber_closed: bool,
    welcome_message: Option<String>,

    event_tx: mpsc::Sender<SessionEvent>,
    event_rx: Option<mpsc::Receiver<SessionEvent>>,
    /// Current sender into the bounded output channel; replaced wholesale on
    /// interruption, which flushes everything buffered.
    buffered_tx: Arc<Mutex<mpsc::Sender<DataPacket>>>,

    tasks: TaskRegistry,
    gen_task: Option<JoinHandle<()>>,
    drain_task: Option<JoinHandle<()>>,
    welcome_task: Option<JoinHandle<()>>,

    metrics: SessionMetrics,
}

impl TurnOrchestrator {
    pub fn new(config: Settings, ports: OrchestratorPorts, agents: AgentBindings) -> Self {
        let (event_tx, event_rx) = mpsc::channel(64);
        // Placeholder until the first drain loop is spawned in run()
        let (buffered_tx, _) = mpsc::channel(1);
        let welcome_message = config.conversation.welcome_message.clone();
        let tools: Arc<dyn ToolExecutor> = Arc::new(ToolInvoker::new(config.api_tools.clone()));

        Self {
            config,
            ports,
            agents,
            route_layer: None,
            agent_router: None,
            tools,
            history: ConversationHistory::new(),
            sequences: Arc::new(SequenceTracker::new()),
            liveness: Arc::new(LivenessState::new()),
            state: OrchestratorState::Idle,
            ended: Arc::new(AtomicBool::new(false)),
            hangup_triggered: false,
            ended_by_assistant: false,
            transcriber_closed: false,
            welcome_message,
            event_tx,
            event_rx: Some(event_rx),
            buffered_tx: Arc::new(Mutex::new(buffered_tx)),
            tasks: TaskRegistry::new(),
            gen_task: None,
            drain_task: None,
            welcome_task: None,
            metrics: SessionMetrics::new(),
        }
    }

    /// Seed the history with a system prompt (and the pending welcome
    /// message, so context injection can rewrite it in place)
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.history = ConversationHistory::with_system(prompt);
        if let Some(welcome) = &self.welcome_message {
            self.history.push(Turn::assistant(welcome.clone()));
        }
        self
    }

    /// Build the route cache and the multi-agent classifier from config.
    /// Setup failure disables the affected layer and the session proceeds
    /// degraded; it never aborts.
    pub fn with_encoder(mut self, encoder: Arc<dyn UtteranceEncoder>) -> Self {
        if !self.config.routing.routes.is_empty() {
            match RouteLayer::build(&self.config.routing.routes, encoder.clone()) {
                Ok(layer) => self.route_layer = Some(Arc::new(layer)),
                Err(e) => {
                    tracing::error!(error = %e, "Route cache setup failed, disabling feature")
                },
            }
        }
        if !self.config.agents.routing.is_empty() {
            match AgentRouter::build(&self.config.agents.routing, encoder) {
                Ok(router) => self.agent_router = Some(Arc::new(router)),
                Err(e) => {
                    tracing::error!(error = %e, "Agent routing setup failed, using default agent")
                },
            }
        }
        self
    }

    /// Replace the tool executor (defaults to the webhook invoker built from
    /// the tools in config)
    pub fn with_tools(mut self, tools: Arc<dyn ToolExecutor>) -> Self {
        self.tools = tools;
        self
    }

    /// Sender for externally injected events (transport init, manual hangup)
    pub fn event_sender(&self) -> mpsc::Sender<SessionEvent> {
        self.event_tx.clone()
    }

    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    /// Run the session to completion.
    ///
    /// Spawns the per-session task set, then reacts to transcriber and
    /// session events until the call ends. Always returns the aggregated
    /// [`SessionSummary`], also on fatal errors (partial state).
    pub async fn run(mut self) -> SessionSummary {
        tracing::info!(
            multi_agent = self.agents.is_multi_agent(),
            routes = self.route_layer.is_some(),
            engine = self.ports.synthesizer.engine(),
            output = self.ports.output.provider(),
            "Session starting"
        );

        let (transcript_tx, mut transcript_rx) = mpsc::channel::<TranscriberEvent>(64);
        let mut event_rx = self
            .event_rx
            .take()
            .expect("run() is called exactly once");

        let input = self.ports.input.clone();
        self.tasks.spawn("input", async move {
            if let Err(e) = input.handle().await {
                tracing::error!(error = %e, "Input handler failed");
            }
        });

        let transcriber = self.ports.transcriber.clone();
        self.tasks.spawn("transcriber", async move {
            if let Err(e) = transcriber.run(transcript_tx).await {
                tracing::error!(error = %e, "Transcriber failed");
            }
        });

        let synthesizer = self.ports.synthesizer.clone();
        self.tasks.spawn("synthesizer_monitor", async move {
            if let Err(e) = synthesizer.monitor_connection().await {
                tracing::warn!(error = %e, "Synthesizer monitor exited");
            }
        });

        self.spawn_drain();
        self.spawn_synthesizer_listener();
        self.spawn_monitor();
        self.spawn_backchannel();
        self.spawn_ambient();

        if !self.config.conversation.web_initiated {
            self.spawn_welcome();
        }
        self.state = OrchestratorState::Listening;

        while !self.ended.load(Ordering::SeqCst) {
            tokio::select! {
                maybe = transcript_rx.recv() => match maybe {
                    Some(event) => self.on_transcriber_event(event).await,
                    None => {
                        if !self.transcriber_closed {
                            tracing::warn!("Transcriber channel dropped");
                            self.end_conversation(false).await;
                        }
                        break;
                    },
                },
                maybe = event_rx.recv() => match maybe {
                    Some(event) => self.on_session_event(event).await,
                    None => break,
                },
            }
        }

        // Give the transcriber a moment to report its total duration
        if !self.transcriber_closed {
            let _ = tokio::time::timeout(Duration::from_secs(2), async {
                while let Some(event) = transcript_rx.recv().await {
                    if let TranscriberEvent::ConnectionClosed { duration_secs } = event {
                        self.metrics.transcription_secs += duration_secs;
                        break;
                    }
                }
            })
            .await;
        }

        self.teardown().await
    }

    // ------------------------------------------------------------------
    // Transcriber events
    // ------------------------------------------------------------------

    async fn on_transcriber_event(&mut self, event: TranscriberEvent) {
        match event {
            TranscriberEvent::SpeechStarted => {
                if self.ports.input.welcome_message_played() {
                    tracing::debug!("User started speaking");
                }
            },

            TranscriberEvent::Interim { content } => {
                if self.hangup_triggered {
                    return;
                }
                self.liveness.mark_human_word();
                self.liveness.set_user_speaking(true);
                if !self.ports.input.welcome_message_played() {
                    return;
                }
                if self.state == OrchestratorState::Listening {
                    self.state = OrchestratorState::Transcribing;
                }

                let words = content.split_whitespace().count();
                let threshold = self.config.conversation.interruption_word_threshold;
                if self.ports.input.is_audio_playing()
                    && words >= threshold
                    && !self.config.conversation.is_accidental_interruption(&content)
                {
                    tracing::info!(
                        words,
                        turn_id = self.sequences.turn_id(),
                        "Barge-in detected"
                    );
                    self.handle_interruption().await;
                }
            },

            TranscriberEvent::Final { content } => {
                if self.hangup_triggered {
                    return;
                }
                self.liveness.mark_human_word();
                self.liveness.set_user_speaking(false);
                if content.trim().is_empty() {
                    self.state = OrchestratorState::Listening;
                    return;
                }
                self.on_final_transcript(content).await;
            },

            TranscriberEvent::ConnectionClosed { duration_secs } => {
                self.metrics.transcription_secs += duration_secs;
                self.transcriber_closed = true;
                if !self.ended.load(Ordering::SeqCst) && !self.hangup_triggered {
                    tracing::warn!("Transcriber connection closed mid-session");
                    self.end_conversation(false).await;
                }
            },
        }
    }

    /// Route the finalized utterance: agent selection, cache lookup, then
    /// generation on a miss.
    async fn on_final_transcript(&mut self, utterance: String) {
        let meta = PacketMeta::new(self.sequences.next(), self.sequences.turn_id())
            .with_origin(PacketOrigin::Transcriber);
        self.state = OrchestratorState::Routing;

        if let Some(layer) = &self.route_layer {
            if let Some(hit) = layer.lookup(&utterance) {
                tracing::info!(route = %hit.route_name, "Route hit, responding from cache");
                let meta = meta
                    .with_origin(PacketOrigin::RouteCache)
                    .with_cached(true)
                    .with_end_of_stream(true);
                self.feed().send_text(&hit.response, meta).await;
                self.state = OrchestratorState::Synthesizing;
                return;
            }
        }

        let agent = self.select_agent(&utterance);
        self.state = OrchestratorState::Generating;
        let meta = meta.with_origin(PacketOrigin::Agent);

        let completion_prompt = if self.config.conversation.use_llm_for_hangup {
            Some(self.config.conversation.completion_check_prompt.clone())
        } else {
            None
        };

        let ctx = GenerationContext {
            agent,
            tools: self.tools.clone(),
            snapshot: self.history.snapshot(),
            utterance,
            meta,
            stream_responses: self.config.conversation.stream_responses,
            completion_prompt,
            feed: self.feed(),
            events: self.event_tx.clone(),
        };
        self.gen_task = Some(tokio::spawn(drive_generation(ctx)));
    }

    fn select_agent(&self, utterance: &str) -> Arc<dyn ReasoningAgent> {
        if let Some(router) = &self.agent_router {
            if let Some(name) = router.classify(utterance) {
                if let Some(agent) = self.agents.get(name) {
                    return agent.clone();
                }
                tracing::warn!(agent = name, "Routed to unbound agent, using default");
            }
        }
        self.agents.default_agent().clone()
    }

    // ------------------------------------------------------------------
    // Session events
    // ------------------------------------------------------------------

    async fn on_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::ExchangeCompleted { turns, latency_ms } => {
                if let Some(latency) = latency_ms {
                    self.metrics.agent_latencies_ms.push(latency);
                }
                self.history.extend(turns);
                self.gen_task = None;
                self.state = OrchestratorState::Playing;
            },

            SessionEvent::TurnFailed { reason } => {
                tracing::warn!(%reason, "Turn abandoned, back to listening");
                self.gen_task = None;
                self.state = OrchestratorState::Listening;
            },

            SessionEvent::FinalChunkPlayed { origin } => {
                self.liveness.mark_transmitted();
                // The prompt itself must not end the silence episode it
                // belongs to, or it would repeat and keep resetting the
                // hangup clock.
                if origin != PacketOrigin::StillThere {
                    self.liveness.set_asked_still_there(false);
                }
                self.ports.input.set_audio_playing(false);
                if origin == PacketOrigin::Hangup {
                    self.ports.output.set_hangup_sent();
                    self.end_conversation(true).await;
                } else if matches!(
                    self.state,
                    OrchestratorState::Playing | OrchestratorState::Synthesizing
                ) {
                    self.state = OrchestratorState::Listening;
                }
            },

            SessionEvent::StillTherePrompt => {
                if self.hangup_triggered {
                    return;
                }
                self.liveness.set_asked_still_there(true);
                if self.config.conversation.check_if_user_online {
                    tracing::info!("Asking if the user is still there");
                    let message = self.config.conversation.user_online_message.clone();
                    let meta = PacketMeta::out_of_band(PacketOrigin::StillThere);
                    self.feed().send_text(&message, meta).await;
                }
            },

            SessionEvent::HangupRequested => {
                if !self.hangup_triggered && !self.ended.load(Ordering::SeqCst) {
                    self.process_call_hangup().await;
                }
            },

            SessionEvent::InitReceived { context } => {
                self.on_init_event(context).await;
            },

            SessionEvent::WelcomeTimedOut => {
                tracing::warn!("No transport stream id for the welcome message, ending session");
                self.end_conversation(true).await;
            },
        }
    }

    /// Inject asynchronously delivered session context: rewrite the system
    /// entry, refresh the pending welcome message, acknowledge, then greet.
    async fn on_init_event(&mut self, context: HashMap<String, String>) {
        if let Some(first) = self.history.turns().first() {
            if first.role == TurnRole::System {
                let updated = apply_context(&first.content, &context);
                self.history.rewrite_system(updated);
            }
        }
        if let Some(welcome) = &self.welcome_message {
            let updated = apply_context(welcome, &context);
            self.history.rewrite_welcome(updated.clone());
            self.welcome_message = Some(updated);
        }
        if let Err(e) = self.ports.output.send_init_ack().await {
            tracing::warn!(error = %e, "Init acknowledgement failed");
        }
        self.spawn_welcome();
    }

    // ------------------------------------------------------------------
    // Interruption and termination
    // ------------------------------------------------------------------

    /// Barge-in cleanup: invalidate every live sequence, cancel in-flight
    /// generation, flush buffered output and tell the transport playback
    /// stopped. In-flight tasks may still deliver a few buffered packets;
    /// the live-sequence filter drops them.
    async fn handle_interruption(&mut self) {
        self.sequences.reset();

        if let Some(task) = self.gen_task.take() {
            task.abort();
        }
        if let Some(task) = self.welcome_task.take() {
            task.abort();
        }

        self.ports.synthesizer.handle_interruption().await;
        if let Err(e) = self.ports.output.handle_interruption().await {
            tracing::warn!(error = %e, "Output interruption failed");
        }

        // Replacing the channel drops everything still buffered
        self.spawn_drain();

        self.ports.input.set_audio_playing(false);
        self.liveness.mark_transmitted();
        self.state = OrchestratorState::Listening;
    }

    /// Orchestrated hangup: finish in-flight audio, then speak the hangup
    /// message (the drain loop's `FinalChunkPlayed` for it completes the
    /// teardown), or end directly when no message is configured.
    async fn process_call_hangup(&mut self) {
        let Some(message) = self.config.conversation.hangup_message.clone() else {
            self.end_conversation(true).await;
            return;
        };

        self.wait_for_playback_idle().await;
        self.handle_interruption().await;
        self.hangup_triggered = true;

        let meta = PacketMeta::out_of_band(PacketOrigin::Hangup);
        self.feed().send_text(&message, meta).await;
    }

    async fn wait_for_playback_idle(&self) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while self.ports.input.is_audio_playing()
            && Instant::now() < deadline
            && !self.ended.load(Ordering::SeqCst)
        {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    async fn end_conversation(&mut self, by_assistant: bool) {
        if self.ended.swap(true, Ordering::SeqCst) {
            return;
        }
        self.ended_by_assistant = by_assistant;

        if self.hangup_triggered {
            if let Some(message) = &self.config.conversation.hangup_message {
                self.history.push(Turn::assistant(message.clone()));
            }
        }

        if let Err(e) = self.ports.input.stop().await {
            tracing::warn!(error = %e, "Input stop failed");
        }
        if let Err(e) = self.ports.transcriber.toggle_connection().await {
            tracing::warn!(error = %e, "Transcriber teardown failed");
        }
        self.state = OrchestratorState::Ended;
        tracing::info!(by_assistant, "Conversation ended");
    }

    async fn teardown(&mut self) -> SessionSummary {
        if let Some(task) = self.gen_task.take() {
            task.abort();
        }
        if let Some(task) = self.drain_task.take() {
            task.abort();
        }
        if let Some(task) = self.welcome_task.take() {
            task.abort();
        }
        self.tasks.abort_all().await;
        self.ports.synthesizer.cleanup().await;
        self.state = OrchestratorState::Ended;

        SessionSummary {
            messages: self.history.snapshot(),
            conversation_secs: self.metrics.started.elapsed().as_secs_f64(),
            transcription_secs: self.metrics.transcription_secs,
            synthesized_characters: self.ports.synthesizer.synthesized_characters(),
            ended_by_assistant: self.ended_by_assistant,
            turn_count: self.sequences.turn_id(),
            agent_latencies_ms: self.metrics.agent_latencies_ms.clone(),
        }
    }

    // ------------------------------------------------------------------
    // Spawned loops
    // ------------------------------------------------------------------

    fn feed(&self) -> SynthesizerFeed {
        SynthesizerFeed::new(
            self.ports.synthesizer.clone(),
            self.sequences.clone(),
            self.ended.clone(),
        )
    }

    /// (Re)start the output drain loop on a fresh bounded channel. The loop
    /// delivers live packets to the sink in order and reports message
    /// completions; channel capacity is the backpressure bound.
    fn spawn_drain(&mut self) {
        if let Some(task) = self.drain_task.take() {
            task.abort();
        }

        let (tx, mut rx) =
            mpsc::channel::<DataPacket>(self.config.conversation.output_channel_capacity);
        *self.buffered_tx.lock() = tx;

        let output = self.ports.output.clone();
        let input = self.ports.input.clone();
        let sequences = self.sequences.clone();
        let events = self.event_tx.clone();

        self.drain_task = Some(tokio::spawn(async move {
            while let Some(packet) = rx.recv().await {
                let meta = packet.meta.clone();
                if !meta.is_out_of_band() && !sequences.is_live(meta.sequence_id) {
                    tracing::debug!(
                        sequence_id = meta.sequence_id,
                        "Skipping stale output chunk"
                    );
                    continue;
                }
                input.set_audio_playing(true);
                if let Err(e) = output.handle(packet).await {
                    tracing::error!(error = %e, "Output sink error");
                }
                if meta.end_of_stream {
                    let _ = events
                        .send(SessionEvent::FinalChunkPlayed { origin: meta.origin })
                        .await;
                }
            }
        }));
    }

    /// Forward synthesized audio into the buffered output channel, filtered
    /// by live sequence id.
    fn spawn_synthesizer_listener(&mut self) {
        let mut stream = self.ports.synthesizer.audio_stream();
        let sequences = self.sequences.clone();
        let buffered = self.buffered_tx.clone();
        let ended = self.ended.clone();

        self.tasks.spawn("synthesizer_listener", async move {
            while let Some(packet) = stream.next().await {
                if ended.load(Ordering::SeqCst) {
                    break;
                }
                let meta = &packet.meta;
                if !meta.is_out_of_band() && !sequences.is_live(meta.sequence_id) {
                    tracing::debug!(
                        sequence_id = meta.sequence_id,
                        "Dropping stale synthesized chunk"
                    );
                    continue;
                }
                let tx = buffered.lock().clone();
                if tx.send(packet).await.is_err() {
                    // The drain loop was replaced mid-send; the chunk
                    // belonged to the interrupted turn anyway.
                    continue;
                }
            }
        });
    }

    /// Cooperative liveness timer. Suppressed while audio plays and while
    /// the user spoke more recently than the assistant's last transmission.
    fn spawn_monitor(&mut self) {
        let conversation = self.config.conversation.clone();
        let liveness = self.liveness.clone();
        let input = self.ports.input.clone();
        let events = self.event_tx.clone();
        let ended = self.ended.clone();

        self.tasks.spawn("hangup_monitor", async move {
            let mut ticker =
                tokio::time::interval(Duration::from_secs_f64(conversation.monitor_tick_secs));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                if ended.load(Ordering::SeqCst) {
                    break;
                }
                if input.is_audio_playing() {
                    continue;
                }
                if !liveness.assistant_spoke_last() {
                    continue;
                }

                let silence = liveness.secs_since_transmitted();
                if conversation.hangup_after_silence_secs > 0.0
                    && silence > conversation.hangup_after_silence_secs
                {
                    tracing::info!(
                        silence_secs = format!("{:.1}", silence),
                        "Silence threshold reached, hanging up"
                    );
                    let _ = events.send(SessionEvent::HangupRequested).await;
                    break;
                }
                if silence > conversation.still_there_after_secs
                    && !liveness.asked_still_there()
                {
                    let _ = events.send(SessionEvent::StillTherePrompt).await;
                }
            }
        });
    }

    /// Synthesize the welcome message once the transport stream id exists.
    fn spawn_welcome(&mut self) {
        let Some(message) = self.welcome_message.clone() else {
            return;
        };
        if message.is_empty() {
            return;
        }
        if let Some(task) = self.welcome_task.take() {
            task.abort();
        }

        let input = self.ports.input.clone();
        let feed = self.feed();
        let events = self.event_tx.clone();
        let timeout_secs = self.config.conversation.welcome_timeout_secs;

        self.welcome_task = Some(tokio::spawn(async move {
            let deadline = Instant::now() + Duration::from_secs_f64(timeout_secs);
            loop {
                if input.stream_id().is_some() {
                    let meta =
                        PacketMeta::out_of_band(PacketOrigin::Welcome).with_cached(true);
                    feed.send_text(&message, meta).await;
                    break;
                }
                if Instant::now() >= deadline {
                    let _ = events.send(SessionEvent::WelcomeTimedOut).await;
                    break;
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }));
    }

    /// Backchannel filler loop. Plays a random preset while the user is
    /// speaking and nothing else is playing. Unreadable presets disable the
    /// feature; the session proceeds without it.
    fn spawn_backchannel(&mut self) {
        let cfg = self.config.conversation.backchannel.clone();
        if !cfg.enabled {
            return;
        }

        let files: Vec<std::path::PathBuf> = match std::fs::read_dir(&cfg.audio_dir) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_file())
                .collect(),
            Err(e) => {
                tracing::error!(
                    error = %e,
                    dir = %cfg.audio_dir,
                    "Could not load backchannel audio, disabling feature"
                );
                return;
            },
        };
        if files.is_empty() {
            tracing::warn!(dir = %cfg.audio_dir, "No backchannel audio files, disabling feature");
            return;
        }

        let output = self.ports.output.clone();
        let input = self.ports.input.clone();
        let liveness = self.liveness.clone();
        let ended = self.ended.clone();

        self.tasks.spawn("backchannel", async move {
            tokio::time::sleep(Duration::from_secs_f64(cfg.start_delay_secs)).await;
            let mut rng = StdRng::from_entropy();

            loop {
                if ended.load(Ordering::SeqCst) {
                    break;
                }
                if liveness.is_user_speaking() && !input.is_audio_playing() {
                    let file = &files[rng.gen_range(0..files.len())];
                    match tokio::fs::read(file).await {
                        Ok(bytes) => {
                            let meta = PacketMeta::out_of_band(PacketOrigin::Backchannel)
                                .with_end_of_stream(false);
                            if let Err(e) = output.handle(DataPacket::audio(bytes, meta)).await {
                                tracing::warn!(error = %e, "Backchannel delivery failed");
                            }
                        },
                        Err(e) => tracing::warn!(error = %e, "Backchannel file unreadable"),
                    }
                }
                tokio::time::sleep(Duration::from_secs_f64(cfg.message_gap_secs)).await;
            }
        });
    }

    /// Ambient noise loop, cycling soundtrack chunks into the sink while
    /// nothing else is playing.
    fn spawn_ambient(&mut self) {
        let cfg = self.config.conversation.ambient_noise.clone();
        if !cfg.enabled {
            return;
        }

        let soundtrack = match std::fs::read(&cfg.soundtrack) {
            Ok(bytes) if !bytes.is_empty() => bytes,
            Ok(_) => {
                tracing::warn!(path = %cfg.soundtrack, "Empty soundtrack, disabling ambient noise");
                return;
            },
            Err(e) => {
                tracing::error!(
                    error = %e,
                    path = %cfg.soundtrack,
                    "Could not load soundtrack, disabling ambient noise"
                );
                return;
            },
        };

        let output = self.ports.output.clone();
        let input = self.ports.input.clone();
        let ended = self.ended.clone();
        let chunk_bytes = cfg.chunk_bytes.max(1);

        self.tasks.spawn("ambient_noise", async move {
            let mut offset = 0usize;
            loop {
                if ended.load(Ordering::SeqCst) {
                    break;
                }
                if !input.is_audio_playing() {
                    let end = (offset + chunk_bytes).min(soundtrack.len());
                    let chunk = soundtrack[offset..end].to_vec();
                    offset = if end >= soundtrack.len() { 0 } else { end };

                    let meta = PacketMeta::out_of_band(PacketOrigin::Ambient)
                        .with_end_of_stream(false);
                    if let Err(e) = output.handle(DataPacket::audio(chunk, meta)).await {
                        tracing::warn!(error = %e, "Ambient delivery failed");
                    }
                }
                tokio::time::sleep(Duration::from_secs_f64(cfg.chunk_gap_secs)).await;
            }
        });
    }
}

/// Substitute `{key}` placeholders from the init context
fn apply_context(template: &str, context: &HashMap<String, String>) -> String {
    let mut out = template.to_string();
    for (key, value) in context {
        out = out.replace(&format!("{{{}}}", key), value);
    }
    out
}
