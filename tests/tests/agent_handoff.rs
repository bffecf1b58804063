//! §8 scenario 3 ("handoff"): a tool call returning `ToolOutcome::Handoff`
//! swaps `AgentSession::current_agent`, runs `onExit`/`onEnter` exactly
//! once each, records the tool's output in the chat context, and the
//! follow-up reply is generated under the new agent's instructions.
//!
//! No single crate's own test module can see this whole path: the
//! handoff tool lives in `vagent-session::tools`, the hooks in
//! `vagent-session::agent`, and the assertions need the full
//! `AgentSession` wiring from `vagent-session::session` plus the fake
//! providers from `vagent-providers::testing`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex as AsyncMutex;

use vagent_config::SessionTuning;
use vagent_events::InMemoryEventBus;
use vagent_providers::llm::{ChatChunk, ChatDelta, ChatRequest, ChatStream};
use vagent_providers::stt::testing::FakeStt;
use vagent_providers::tts::testing::FakeTts;
use vagent_providers::turn::testing::FixedTurnDetector;
use vagent_providers::vad::testing::FakeVad;
use vagent_providers::Llm;
use vagent_session::{
    Agent, AgentHooks, AgentSession, AudioSink, SessionConfig, SessionProviders, SpeechPriority, Tool, ToolCtx,
    ToolError, ToolOutcome, ToolRegistry, TurnDetectionMode,
};

/// Replays one canned response per call, looping the last once exhausted —
/// enough to drive "tool call, then a plain reply" across two LLM
/// invocations, which the single-shot `FakeLlm` can't do.
struct ScriptedLlm {
    responses: AsyncMutex<VecDeque<Vec<ChatChunk>>>,
}

impl ScriptedLlm {
    fn new(responses: Vec<Vec<ChatChunk>>) -> Self {
        Self { responses: AsyncMutex::new(responses.into()) }
    }
}

#[async_trait]
impl Llm for ScriptedLlm {
    async fn chat(&self, _req: ChatRequest) -> vagent_providers::Result<ChatStream> {
        let mut queue = self.responses.lock().await;
        let chunks = queue.pop_front().unwrap_or_default();
        Ok(Box::pin(futures::stream::iter(chunks.into_iter().map(Ok))))
    }

    fn model_name(&self) -> &str {
        "scripted-fake"
    }
}

/// A tool that always hands off to a fixed replacement agent.
struct TransferTool {
    target: Arc<Agent>,
    message: String,
}

#[async_trait]
impl Tool for TransferTool {
    fn name(&self) -> &str {
        "transfer_to_billing"
    }

    async fn execute(&self, _args: serde_json::Value, _ctx: &ToolCtx) -> Result<ToolOutcome, ToolError> {
        Ok(ToolOutcome::Handoff { agent: self.target.clone(), returns: Some(self.message.clone()) })
    }
}

struct CountingHooks {
    enters: Arc<AtomicUsize>,
    exits: Arc<AtomicUsize>,
}

#[async_trait]
impl AgentHooks for CountingHooks {
    async fn on_enter(&self, _agent: &Agent) {
        self.enters.fetch_add(1, Ordering::SeqCst);
    }
    async fn on_exit(&self, _agent: &Agent) {
        self.exits.fetch_add(1, Ordering::SeqCst);
    }
}

struct DiscardSink;

#[async_trait]
impl AudioSink for DiscardSink {
    async fn push(&self, _frame: vagent_providers::tts::TtsFrame) {}
    async fn clear_buffer(&self) {}
}

#[tokio::test]
async fn tool_emitted_handoff_swaps_agent_and_drives_the_follow_up_reply() {
    let triage_exits = Arc::new(AtomicUsize::new(0));
    let billing_enters = Arc::new(AtomicUsize::new(0));

    let billing_agent = Arc::new(
        Agent::new("You are the billing agent; be precise about charges.").with_hooks(Arc::new(CountingHooks {
            enters: billing_enters.clone(),
            exits: Arc::new(AtomicUsize::new(0)),
        })),
    );

    let mut triage_tools = ToolRegistry::new();
    triage_tools.register(Arc::new(TransferTool { target: billing_agent.clone(), message: "transferring".into() }));
    let triage_agent = Agent::new("You are the triage agent.")
        .with_tools(triage_tools)
        .with_hooks(Arc::new(CountingHooks { enters: Arc::new(AtomicUsize::new(0)), exits: triage_exits.clone() }));

    let llm = ScriptedLlm::new(vec![
        vec![ChatChunk {
            id: "1".into(),
            delta: ChatDelta::ToolCall { name: "transfer_to_billing".into(), arguments: serde_json::json!({}) },
            usage: None,
        }],
        vec![ChatChunk { id: "2".into(), delta: ChatDelta::Text("Your balance is zero.".into()), usage: None }],
    ]);

    let providers = SessionProviders {
        stt: Arc::new(FakeStt::new(vec![])),
        llm: Arc::new(llm),
        tts: Arc::new(FakeTts::new(16_000)),
        vad: Arc::new(FakeVad::new(vec![])),
        turn_detector: Arc::new(FixedTurnDetector { probability: 0.9 }),
        sink: Arc::new(DiscardSink),
    };

    let config = SessionConfig { tuning: SessionTuning::default(), turn_detection: TurnDetectionMode::Vad };
    let events = Arc::new(InMemoryEventBus::new());
    let session = AgentSession::new(config, providers, events, triage_agent);
    session.start().await;

    // Drive the tool call and the handoff it produces.
    let first = session.generate_reply(SpeechPriority::NORMAL);
    first.wait_for_playout().await;

    assert_eq!(triage_exits.load(Ordering::SeqCst), 1, "old agent's onExit ran exactly once");
    assert_eq!(billing_enters.load(Ordering::SeqCst), 1, "new agent's onEnter ran exactly once");

    let current = session.current_agent().await;
    assert_eq!(current.instructions, billing_agent.instructions);

    let ctx = session.chat_context().await;
    let tool_output = ctx
        .items()
        .iter()
        .find(|item| item.role == vagent_chat::ChatRole::ToolOutput)
        .expect("tool output item recorded");
    assert_eq!(tool_output.content.as_text(), Some("transferring"));

    // A follow-up reply should now be generated under the new agent — the
    // scripted LLM's second response stands in for that.
    let second = session.generate_reply(SpeechPriority::NORMAL);
    second.wait_for_playout().await;

    let ctx = session.chat_context().await;
    let assistant_texts: Vec<_> = ctx
        .items()
        .iter()
        .filter(|item| item.role == vagent_chat::ChatRole::Assistant)
        .filter_map(|item| item.content.as_text())
        .collect();
    assert!(assistant_texts.iter().any(|t| t.contains("balance")));

    session.close("test done").await;
}
