//! `AgentSession` (§4.4-§4.7): wires recognition, the speech scheduler, and
//! the generation pipeline into one conversation runtime, with a single
//! driver task serially authorizing and playing out queued speech.
//!
//! Grounded in `vagent-worker::worker::Worker::run`'s single-`select!`
//! driver loop shape (register/ping/recv all on one task), generalized
//! here to two cooperating loops — recognition and speech playout —
//! sharing state through `Arc<SessionInner>` instead of one struct owning
//! everything directly.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use vagent_chat::{diff, ChatContext};
use vagent_concurrency::CancellableTask;
use vagent_config::SessionTuning;
use vagent_events::{AgentEvent, AgentState, EventBusRef, SpeechSource};
use vagent_providers::vad::VadEvent;
use vagent_providers::{Llm, Stt, Tts, TurnDetector, Vad};

use crate::agent::Agent;
use crate::generation::{AudioSink, GenerationError, GenerationPipeline};
use crate::recognition::{RecognitionEvent, RecognitionState, TurnDetectionMode};
use crate::scheduler::{SpeechHandle, SpeechJob, SpeechPriority, SpeechScheduler};

/// Default capability providers for the session; an [`Agent`]'s
/// [`crate::agent::ProviderOverrides`] take precedence over these when set.
pub struct SessionProviders {
    pub stt: Arc<dyn Stt>,
    pub llm: Arc<dyn Llm>,
    pub tts: Arc<dyn Tts>,
    pub vad: Arc<dyn Vad>,
    pub turn_detector: Arc<dyn TurnDetector>,
    pub sink: Arc<dyn AudioSink>,
}

#[derive(Clone)]
pub struct SessionConfig {
    pub tuning: SessionTuning,
    pub turn_detection: TurnDetectionMode,
}

pub(crate) struct SessionInner {
    providers: SessionProviders,
    chat_ctx: Mutex<ChatContext>,
    current_agent: Mutex<Arc<Agent>>,
    scheduler: SpeechScheduler,
    recognition: Arc<RecognitionState>,
    events: EventBusRef,
    config: SessionConfig,
    state: Mutex<AgentState>,
}

impl SessionInner {
    fn effective_llm(&self, agent: &Agent) -> Arc<dyn Llm> {
        agent.overrides().llm.clone().unwrap_or_else(|| self.providers.llm.clone())
    }

    fn effective_tts(&self, agent: &Agent) -> Arc<dyn Tts> {
        agent.overrides().tts.clone().unwrap_or_else(|| self.providers.tts.clone())
    }

    async fn set_state(&self, new: AgentState) {
        let mut state = self.state.lock().await;
        if *state != new {
            let old = *state;
            *state = new;
            self.events.emit(AgentEvent::AgentStateChanged { old, new });
        }
    }

    /// Wrap and queue a new speech handle (§4.5), used by both the public
    /// `say`/`generate_reply` API and the recognition loop's automatic
    /// reply on turn commit.
    fn enqueue_speech(
        &self,
        priority: SpeechPriority,
        source: SpeechSource,
        job: SpeechJob,
        allow_interruptions: bool,
    ) -> Arc<SpeechHandle> {
        let seq = self.scheduler.next_seq();
        let id = format!("speech-{seq}");
        let handle = SpeechHandle::new(id.clone(), priority, source, job, seq, allow_interruptions);
        self.events.emit(AgentEvent::SpeechCreated { speech_id: id, priority: priority.0, source });
        self.scheduler.enqueue(handle.clone());
        handle
    }

    async fn handle_recognition_event(&self, event: RecognitionEvent) {
        match event {
            RecognitionEvent::Transcript { text, is_final } => {
                self.events.emit(AgentEvent::UserInputTranscribed { transcript: text, is_final });
            }
            RecognitionEvent::CommitTurn { text } => {
                // §4.4 `discardAudioIfUninterruptible`: while an
                // uninterruptible reply is playing, the user couldn't have
                // barged in anyway, so an EOU-triggered commit this turn
                // produced is noise rather than a real new turn.
                if self.config.tuning.discard_audio_if_uninterruptible
                    && !self.scheduler.current_allows_interruptions().await
                {
                    return;
                }
                self.chat_ctx.lock().await.append_user(&text);
                self.enqueue_speech(SpeechPriority::NORMAL, SpeechSource::GenerateReply, SpeechJob::GenerateReply, true);
            }
            RecognitionEvent::SpeechStarted => {
                self.scheduler.interrupt_current().await;
            }
        }
    }
}

/// The per-call conversation runtime. Construct with [`AgentSession::new`],
/// then call [`AgentSession::start`] once to attach the initial agent and
/// spawn the driver loops.
pub struct AgentSession {
    inner: Arc<SessionInner>,
    driver: Mutex<Option<CancellableTask<()>>>,
    recognizer: Mutex<Option<CancellableTask<()>>>,
    bounce_commits: Mutex<Option<mpsc::UnboundedReceiver<RecognitionEvent>>>,
}

impl AgentSession {
    pub fn new(config: SessionConfig, providers: SessionProviders, events: EventBusRef, initial_agent: Agent) -> Self {
        let (recognition, bounce_commits) = RecognitionState::new(config.turn_detection);
        let inner = Arc::new(SessionInner {
            providers,
            chat_ctx: Mutex::new(ChatContext::new()),
            current_agent: Mutex::new(Arc::new(initial_agent)),
            scheduler: SpeechScheduler::new(),
            recognition: Arc::new(recognition),
            events,
            config,
            state: Mutex::new(AgentState::Initializing),
        });

        Self { inner, driver: Mutex::new(None), recognizer: Mutex::new(None), bounce_commits: Mutex::new(Some(bounce_commits)) }
    }

    /// Attach the initial agent, then spawn the recognition and speech
    /// driver loops. Idempotent only in the sense that calling it twice
    /// spawns a second pair of loops — callers should call it once.
    pub async fn start(&self) {
        {
            let agent = self.inner.current_agent.lock().await;
            agent.attach(&self.inner);
            agent.on_enter().await;
        }
        self.inner.set_state(AgentState::Listening).await;

        let driver_inner = self.inner.clone();
        *self.driver.lock().await = Some(CancellableTask::spawn(move |token| async move {
            Self::driver_loop(driver_inner, token).await;
        }));

        let recognizer_inner = self.inner.clone();
        let bounce_commits = self.bounce_commits.lock().await.take().expect("start called once");
        *self.recognizer.lock().await = Some(CancellableTask::spawn(move |token| async move {
            Self::recognition_loop(recognizer_inner, bounce_commits, token).await;
        }));
    }

    /// Queue fixed text to be spoken verbatim (§4.5 `session.say()`),
    /// interruptible by default.
    pub fn say(&self, text: impl Into<String>, priority: SpeechPriority) -> Arc<SpeechHandle> {
        self.say_with_interruptions(text, priority, true)
    }

    /// `say()` with explicit control over `SpeechHandle.allowInterruptions`
    /// — `false` for replies that must finish uninterrupted (§4.5).
    pub fn say_with_interruptions(
        &self,
        text: impl Into<String>,
        priority: SpeechPriority,
        allow_interruptions: bool,
    ) -> Arc<SpeechHandle> {
        self.inner.enqueue_speech(priority, SpeechSource::Say, SpeechJob::Say(text.into()), allow_interruptions)
    }

    /// Queue a fresh LLM-driven reply (§4.5 `session.generateReply()`),
    /// interruptible by default.
    pub fn generate_reply(&self, priority: SpeechPriority) -> Arc<SpeechHandle> {
        self.generate_reply_with_interruptions(priority, true)
    }

    /// `generate_reply()` with explicit control over
    /// `SpeechHandle.allowInterruptions`.
    pub fn generate_reply_with_interruptions(&self, priority: SpeechPriority, allow_interruptions: bool) -> Arc<SpeechHandle> {
        self.inner.enqueue_speech(priority, SpeechSource::GenerateReply, SpeechJob::GenerateReply, allow_interruptions)
    }

    /// Interrupt whichever speech handle is currently playing (§4.5).
    pub async fn interrupt(&self) {
        self.inner.scheduler.interrupt_current().await;
    }

    /// Force-commit the user's in-progress turn regardless of EOU state
    /// (§4.4 `commitUserTurn`), scheduling a reply if there was anything
    /// to commit.
    pub async fn commit_user_turn(&self) {
        if let Some(text) = self.inner.recognition.commit_user_turn().await {
            self.inner.chat_ctx.lock().await.append_user(&text);
            self.inner.enqueue_speech(SpeechPriority::NORMAL, SpeechSource::GenerateReply, SpeechJob::GenerateReply, true);
        }
    }

    /// Discard the user's in-progress turn (§4.4 `clearUserTurn`).
    pub async fn clear_user_turn(&self) {
        self.inner.recognition.clear_user_turn().await;
    }

    /// Append a user turn verbatim, bypassing STT/VAD entirely, and
    /// schedule a reply — the text-input path the `connect` CLI debug
    /// client uses in place of a microphone (§6.4's "text+audio testing").
    pub async fn say_user_text(&self, text: impl Into<String>) {
        let text = text.into();
        self.inner.events.emit(AgentEvent::UserInputTranscribed { transcript: text.clone(), is_final: true });
        self.inner.chat_ctx.lock().await.append_user(&text);
        self.inner.enqueue_speech(SpeechPriority::NORMAL, SpeechSource::GenerateReply, SpeechJob::GenerateReply, true);
    }

    /// Replace the chat context wholesale, diffing against the current one
    /// so only genuinely new items raise `ConversationItemAdded` (data
    /// model's identity-preserving update contract).
    pub async fn update_chat_context(&self, new_ctx: ChatContext) {
        let mut current = self.inner.chat_ctx.lock().await;
        let delta = diff(&current, &new_ctx);
        for (_after, id) in &delta.to_create {
            if let Some(item) = new_ctx.get(id) {
                self.inner.events.emit(AgentEvent::ConversationItemAdded {
                    item_id: item.id.clone(),
                    role: format!("{:?}", item.role),
                });
            }
        }
        *current = new_ctx;
    }

    pub async fn chat_context(&self) -> ChatContext {
        self.inner.chat_ctx.lock().await.clone()
    }

    pub async fn current_agent(&self) -> Arc<Agent> {
        self.inner.current_agent.lock().await.clone()
    }

    /// Stop both driver loops and close the scheduler (§4.7 session close).
    pub async fn close(&self, reason: impl Into<String>) {
        self.inner.scheduler.close();
        if let Some(driver) = self.driver.lock().await.take() {
            driver.gracefully_cancel().await;
        }
        if let Some(recognizer) = self.recognizer.lock().await.take() {
            recognizer.gracefully_cancel().await;
        }
        self.inner.events.emit(AgentEvent::CloseEvent { reason: reason.into() });
    }

    async fn driver_loop(inner: Arc<SessionInner>, token: CancellationToken) {
        loop {
            let handle = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                handle = inner.scheduler.next() => handle,
            };
            let Some(handle) = handle else { break };

            handle.mark_playing().await;
            inner.set_state(AgentState::Speaking).await;

            let agent = inner.current_agent.lock().await.clone();
            let llm = inner.effective_llm(&agent);
            let tts = inner.effective_tts(&agent);
            let pipeline = GenerationPipeline {
                llm: llm.as_ref(),
                tts: tts.as_ref(),
                sink: inner.providers.sink.as_ref(),
                events: &inner.events,
                max_tool_steps: inner.config.tuning.max_tool_steps,
            };

            let outcome = match &handle.job {
                SpeechJob::Say(text) => pipeline.say(&handle, text).await,
                SpeechJob::GenerateReply => {
                    let mut ctx = inner.chat_ctx.lock().await;
                    pipeline.run(&handle, &agent, &mut ctx).await
                }
            };

            match outcome {
                Ok(outcome) => {
                    if let Some(next_agent) = outcome.handoff {
                        agent.on_exit().await;
                        next_agent.attach(&inner);
                        next_agent.on_enter().await;
                        *inner.current_agent.lock().await = next_agent;
                    }
                }
                Err(GenerationError::Cancelled { spoken_text }) => {
                    // §7 scenario 2: an interrupted reply is stored
                    // truncated to the spoken prefix, not dropped. Only
                    // `GenerateReply` jobs append to the chat context here —
                    // `say()` speaks text that's already in the context
                    // (or not meant to enter it at all).
                    if matches!(handle.job, SpeechJob::GenerateReply) && !spoken_text.trim().is_empty() {
                        inner.chat_ctx.lock().await.append_assistant(spoken_text.trim());
                    }
                }
                Err(err) => {
                    inner.events.emit(AgentEvent::ErrorEvent { source: "generation".into(), error: err.to_string() });
                }
            }

            inner.scheduler.finish_current().await;
            let interrupted = handle.is_interrupted();
            inner.events.emit(AgentEvent::PlaybackFinished {
                speech_id: handle.id.clone(),
                interrupted,
                playback_position_ms: 0,
            });
            inner.set_state(AgentState::Listening).await;
        }
    }

    async fn recognition_loop(
        inner: Arc<SessionInner>,
        mut bounce_commits: mpsc::UnboundedReceiver<RecognitionEvent>,
        token: CancellationToken,
    ) {
        let mut stt_stream = match inner.providers.stt.stream() {
            Ok(stream) => stream,
            Err(err) => {
                tracing::warn!(error = %err, "failed to open stt stream");
                return;
            }
        };
        let mut vad_stream = match inner.providers.vad.stream() {
            Ok(stream) => stream,
            Err(err) => {
                tracing::warn!(error = %err, "failed to open vad stream");
                return;
            }
        };

        // Either stream can end independently (a fake/finite fixture in
        // tests, or a provider hiccup in production); once exhausted, its
        // branch is disabled rather than polled in a busy loop forever.
        let mut stt_done = false;
        let mut vad_done = false;

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                stt_event = stt_stream.next(), if !stt_done => {
                    let Some(stt_event) = stt_event else { stt_done = true; continue };
                    match stt_event {
                        Ok(event) => {
                            for recognition_event in inner.recognition.handle_stt_event(event).await {
                                inner.handle_recognition_event(recognition_event).await;
                            }
                        }
                        Err(err) => tracing::warn!(error = %err, "stt stream error"),
                    }
                }
                vad_event = vad_stream.next(), if !vad_done => {
                    let Some(vad_event) = vad_event else { vad_done = true; continue };
                    match vad_event {
                        Ok(event) => {
                            Self::handle_vad_event(&inner, event).await;
                        }
                        Err(err) => tracing::warn!(error = %err, "vad stream error"),
                    }
                }
                // A semantic-mode bounce task decided to commit (§4.4 step
                // 6). Folds through the same path as every other
                // recognition event so chat-context append and the
                // automatic reply enqueue stay in one place.
                commit = bounce_commits.recv() => {
                    let Some(commit) = commit else { continue };
                    inner.handle_recognition_event(commit).await;
                }
            }
        }
    }

    /// Fold one VAD event into the recognition state, then — in addition
    /// to whatever events the fold itself produces — drive the
    /// `Semantic`-mode bounce: speech starting cancels any pending EOU
    /// decision from the previous utterance; speech ending schedules one.
    async fn handle_vad_event(inner: &Arc<SessionInner>, event: VadEvent) {
        let is_speech_start = matches!(event, VadEvent::SpeechStart { .. });
        let is_speech_end = matches!(event, VadEvent::SpeechEnd { .. });

        if is_speech_start {
            inner.recognition.cancel_pending_commit().await;
        }

        for recognition_event in inner.recognition.handle_vad_event(event).await {
            inner.handle_recognition_event(recognition_event).await;
        }

        if is_speech_end && inner.config.turn_detection == TurnDetectionMode::Semantic {
            let chat_ctx = inner.chat_ctx.lock().await.clone();
            inner
                .recognition
                .schedule_commit(
                    inner.providers.turn_detector.clone(),
                    chat_ctx,
                    inner.config.tuning.min_endpointing_delay(),
                    inner.config.tuning.max_endpointing_delay(),
                )
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Agent;
    use crate::generation::testing::CollectingSink;
    use crate::tools::testing::EchoTool;
    use crate::tools::ToolRegistry;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use vagent_events::InMemoryEventBus;
    use vagent_providers::llm::{testing::FakeLlm, ChatChunk, ChatDelta, ChatRequest, ChatStream};
    use vagent_providers::stt::testing::FakeStt;
    use vagent_providers::tts::testing::FakeTts;
    use vagent_providers::turn::testing::FixedTurnDetector;
    use vagent_providers::vad::testing::FakeVad;

    fn test_config() -> SessionConfig {
        SessionConfig { tuning: SessionTuning::default(), turn_detection: TurnDetectionMode::Vad }
    }

    fn test_providers(llm: Arc<dyn Llm>) -> (SessionProviders, Arc<CollectingSink>) {
        let sink = Arc::new(CollectingSink::default());
        let providers = SessionProviders {
            stt: Arc::new(FakeStt::new(vec![])),
            llm,
            tts: Arc::new(FakeTts::new(16_000)),
            vad: Arc::new(FakeVad::new(vec![])),
            turn_detector: Arc::new(FixedTurnDetector { probability: 0.9 }),
            sink: sink.clone(),
        };
        (providers, sink)
    }

    /// A stateful fake LLM: returns its canned responses one call at a
    /// time, repeating the last once exhausted. `FakeLlm` always replays
    /// the same response, which can't exercise the tool-call loop's
    /// "call again after executing a tool" step.
    struct SequencedLlm {
        responses: tokio::sync::Mutex<VecDeque<Vec<ChatChunk>>>,
    }

    impl SequencedLlm {
        fn new(responses: Vec<Vec<ChatChunk>>) -> Self {
            Self { responses: tokio::sync::Mutex::new(responses.into()) }
        }
    }

    #[async_trait]
    impl Llm for SequencedLlm {
        async fn chat(&self, _req: ChatRequest) -> vagent_providers::Result<ChatStream> {
            let mut queue = self.responses.lock().await;
            let chunks = queue.pop_front().unwrap_or_default();
            Ok(Box::pin(futures::stream::iter(chunks.into_iter().map(Ok))))
        }

        fn model_name(&self) -> &str {
            "sequenced-fake"
        }
    }

    #[tokio::test]
    async fn say_enqueues_and_plays_out_fixed_text() {
        let (providers, _sink) = test_providers(Arc::new(FakeLlm::new(vec![])));
        let events = Arc::new(InMemoryEventBus::new());
        let session = AgentSession::new(test_config(), providers, events.clone(), Agent::new("be terse"));
        session.start().await;

        let handle = session.say("hello there", SpeechPriority::NORMAL);
        handle.wait_for_playout().await;

        assert_eq!(handle.state().await, crate::scheduler::SpeechHandleState::Done);
        session.close("test done").await;
    }

    #[tokio::test]
    async fn generate_reply_appends_assistant_text_to_chat_context() {
        let (providers, _sink) = test_providers(Arc::new(FakeLlm::new(vec![ChatChunk {
            id: "1".into(),
            delta: ChatDelta::Text("Hello there.".into()),
            usage: None,
        }])));
        let events = Arc::new(InMemoryEventBus::new());
        let session = AgentSession::new(test_config(), providers, events.clone(), Agent::new("be terse"));
        session.start().await;

        let handle = session.generate_reply(SpeechPriority::NORMAL);
        handle.wait_for_playout().await;

        let ctx = session.chat_context().await;
        assert_eq!(ctx.len(), 1);
        assert_eq!(ctx.items()[0].content.as_text(), Some("Hello there."));
        session.close("test done").await;
    }

    #[tokio::test]
    async fn tool_call_result_is_appended_then_pipeline_loops_to_a_final_reply() {
        let llm = SequencedLlm::new(vec![
            vec![ChatChunk {
                id: "1".into(),
                delta: ChatDelta::ToolCall { name: "echo".into(), arguments: serde_json::json!({"x": 1}) },
                usage: None,
            }],
            vec![ChatChunk { id: "2".into(), delta: ChatDelta::Text("done.".into()), usage: None }],
        ]);
        let (providers, _sink) = test_providers(Arc::new(llm));
        let events = Arc::new(InMemoryEventBus::new());

        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(EchoTool::new("echo")));
        let agent = Agent::new("use tools").with_tools(tools);

        let session = AgentSession::new(test_config(), providers, events.clone(), agent);
        session.start().await;

        let handle = session.generate_reply(SpeechPriority::NORMAL);
        handle.wait_for_playout().await;

        let ctx = session.chat_context().await;
        let roles: Vec<_> = ctx.items().iter().map(|i| i.role).collect();
        assert!(roles.contains(&vagent_chat::ChatRole::ToolCall));
        assert!(roles.contains(&vagent_chat::ChatRole::ToolOutput));
        assert!(roles.contains(&vagent_chat::ChatRole::Assistant));
        session.close("test done").await;
    }

    #[tokio::test]
    async fn interrupt_marks_the_playing_handle_interrupted() {
        let chunks = vec![ChatChunk { id: "1".into(), delta: ChatDelta::Text("a slow reply.".into()), usage: None }];
        let (providers, sink) = test_providers(Arc::new(FakeLlm::new(chunks)));
        let events = Arc::new(InMemoryEventBus::new());
        let session = AgentSession::new(test_config(), providers, events.clone(), Agent::new("be terse"));
        session.start().await;

        // Interrupt the handle directly rather than via `session.interrupt()`:
        // the latter only cancels whichever handle the driver loop has
        // already popped as "current", which races against this task. A
        // handle holder can always cancel its own handle regardless of
        // whether the driver has picked it up yet.
        let handle = session.generate_reply(SpeechPriority::NORMAL);
        handle.interrupt();
        handle.wait_for_playout().await;

        assert_eq!(handle.state().await, crate::scheduler::SpeechHandleState::Interrupted);
        assert!(sink.clears.load(std::sync::atomic::Ordering::SeqCst) >= 1, "interrupt drains the sink's buffer");
        session.close("test done").await;
    }

    #[tokio::test]
    async fn uninterruptible_handle_is_unaffected_by_interrupt() {
        let chunks = vec![ChatChunk { id: "1".into(), delta: ChatDelta::Text("a protected reply.".into()), usage: None }];
        let (providers, _sink) = test_providers(Arc::new(FakeLlm::new(chunks)));
        let events = Arc::new(InMemoryEventBus::new());
        let session = AgentSession::new(test_config(), providers, events.clone(), Agent::new("be terse"));
        session.start().await;

        let handle = session.generate_reply_with_interruptions(SpeechPriority::NORMAL, false);
        handle.interrupt();
        handle.wait_for_playout().await;

        assert_eq!(handle.state().await, crate::scheduler::SpeechHandleState::Done);
        session.close("test done").await;
    }


    #[tokio::test]
    async fn semantic_mode_commits_turn_and_replies_after_vad_speech_end() {
        use std::time::Duration;
        use vagent_providers::stt::{Segment, SpeechEvent, SttStreamEvent};

        let stt = FakeStt::new(vec![
            SttStreamEvent::StartOfSpeech,
            SttStreamEvent::Final(SpeechEvent {
                alternatives: vec![Segment {
                    text: "what's the weather".into(),
                    start_ms: 0,
                    end_ms: 500,
                    words: vec![],
                }],
                is_final: true,
                language: None,
            }),
        ]);
        let vad = FakeVad::new(vec![
            VadEvent::SpeechStart { timestamp_ms: 0 },
            VadEvent::SpeechEnd { start_ms: 0, end_ms: 500 },
        ]);
        let sink = Arc::new(CollectingSink::default());
        let providers = SessionProviders {
            stt: Arc::new(stt),
            llm: Arc::new(FakeLlm::new(vec![ChatChunk {
                id: "1".into(),
                delta: ChatDelta::Text("it's sunny.".into()),
                usage: None,
            }])),
            tts: Arc::new(FakeTts::new(16_000)),
            vad: Arc::new(vad),
            turn_detector: Arc::new(FixedTurnDetector { probability: 0.95 }),
            sink,
        };

        let mut tuning = SessionTuning::default();
        tuning.min_endpointing_delay_ms = 5;
        tuning.max_endpointing_delay_ms = 50;
        let config = SessionConfig { tuning, turn_detection: TurnDetectionMode::Semantic };

        let events = Arc::new(InMemoryEventBus::new());
        let session = AgentSession::new(config, providers, events.clone(), Agent::new("be terse"));
        session.start().await;

        // The bounce fires ~5ms after VAD speech-end, then the driver loop
        // plays out the resulting reply; both comfortably finish well
        // inside this margin.
        tokio::time::sleep(Duration::from_millis(200)).await;

        let ctx = session.chat_context().await;
        let roles: Vec<_> = ctx.items().iter().map(|i| i.role).collect();
        assert!(roles.contains(&vagent_chat::ChatRole::User));
        assert!(roles.contains(&vagent_chat::ChatRole::Assistant));
        session.close("test done").await;
    }

    /// Pop an uninterruptible handle onto the scheduler as "current"
    /// directly, bypassing the driver loop, so the EOU-commit gate can be
    /// exercised without racing real playout to completion.
    async fn make_current_and_uninterruptible(session: &AgentSession) -> Arc<SpeechHandle> {
        let seq = session.inner.scheduler.next_seq();
        let handle = SpeechHandle::new(
            format!("speech-{seq}"),
            SpeechPriority::NORMAL,
            SpeechSource::Say,
            SpeechJob::Say("an uninterruptible announcement".into()),
            seq,
            false,
        );
        session.inner.scheduler.enqueue(handle.clone());
        session.inner.scheduler.next().await;
        handle
    }

    #[tokio::test]
    async fn discard_audio_if_uninterruptible_suppresses_the_eou_commit_while_playing() {
        let (providers, _sink) = test_providers(Arc::new(FakeLlm::new(vec![])));
        let events = Arc::new(InMemoryEventBus::new());
        let mut tuning = SessionTuning::default();
        tuning.discard_audio_if_uninterruptible = true;
        let config = SessionConfig { tuning, turn_detection: TurnDetectionMode::Vad };
        let session = AgentSession::new(config, providers, events.clone(), Agent::new("be terse"));

        make_current_and_uninterruptible(&session).await;
        session.inner.handle_recognition_event(RecognitionEvent::CommitTurn { text: "ignored".into() }).await;

        let ctx = session.chat_context().await;
        assert!(ctx.items().iter().all(|i| i.role != vagent_chat::ChatRole::User));
    }

    #[tokio::test]
    async fn discard_audio_if_uninterruptible_false_still_commits_while_playing() {
        let (providers, _sink) = test_providers(Arc::new(FakeLlm::new(vec![])));
        let events = Arc::new(InMemoryEventBus::new());
        let mut tuning = SessionTuning::default();
        tuning.discard_audio_if_uninterruptible = false;
        let config = SessionConfig { tuning, turn_detection: TurnDetectionMode::Vad };
        let session = AgentSession::new(config, providers, events.clone(), Agent::new("be terse"));

        make_current_and_uninterruptible(&session).await;
        session.inner.handle_recognition_event(RecognitionEvent::CommitTurn { text: "heard".into() }).await;

        let ctx = session.chat_context().await;
        assert!(ctx.items().iter().any(|i| i.role == vagent_chat::ChatRole::User));
    }
}
