//! `Agent` (data model `Agent`): instructions, tools, lifecycle hooks, and
//! optional per-agent provider overrides. Swappable atomically as the
//! session's `current_agent` during a handoff (§4.6 step 7).
//!
//! The design notes call for breaking the `Agent <-> AgentSession` cyclic
//! reference with a weak back-pointer set at activation time
//! (`Agent::_attach`); accessors upgrade it or report `ClosedSession`.

use std::sync::{Arc, RwLock, Weak};

use async_trait::async_trait;

use vagent_providers::{Llm, Stt, Tts, Vad};

use crate::session::SessionInner;
use crate::tools::ToolRegistry;

#[derive(Debug, thiserror::Error)]
#[error("agent session is closed")]
pub struct ClosedSession;

/// Lifecycle hooks invoked around a handoff (§4.6 step 7: "call
/// `oldAgent.onExit()`, `newAgent.onEnter()`").
#[async_trait]
pub trait AgentHooks: Send + Sync {
    async fn on_enter(&self, _agent: &Agent) {}
    async fn on_exit(&self, _agent: &Agent) {}
}

/// No-op hooks, the default for an `Agent` built without `with_hooks`.
struct NoopHooks;

#[async_trait]
impl AgentHooks for NoopHooks {}

/// Per-agent capability overrides (data model: "optional per-agent
/// STT/LLM/TTS/VAD overrides"). `None` means the session falls back to
/// its own default for that capability.
#[derive(Default, Clone)]
pub struct ProviderOverrides {
    pub stt: Option<Arc<dyn Stt>>,
    pub llm: Option<Arc<dyn Llm>>,
    pub tts: Option<Arc<dyn Tts>>,
    pub vad: Option<Arc<dyn Vad>>,
}

/// One conversational persona: a system prompt, its tool set, lifecycle
/// hooks, and optional provider overrides. Exactly one `Agent` is active
/// in an `AgentSession` at a time (data model invariant).
pub struct Agent {
    pub instructions: String,
    tools: ToolRegistry,
    hooks: Arc<dyn AgentHooks>,
    overrides: ProviderOverrides,
    session: RwLock<Weak<SessionInner>>,
}

impl Agent {
    pub fn new(instructions: impl Into<String>) -> Self {
        Self {
            instructions: instructions.into(),
            tools: ToolRegistry::new(),
            hooks: Arc::new(NoopHooks),
            overrides: ProviderOverrides::default(),
            session: RwLock::new(Weak::new()),
        }
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn AgentHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_overrides(mut self, overrides: ProviderOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn overrides(&self) -> &ProviderOverrides {
        &self.overrides
    }

    /// Attach this agent to its owning session as a weak back-pointer
    /// (design notes: "the agent never outlives its activation").
    pub(crate) fn attach(&self, session: &Arc<SessionInner>) {
        *self.session.write().unwrap() = Arc::downgrade(session);
    }

    /// Upgrade the weak back-pointer, or `ClosedSession` if the owning
    /// session has already been dropped.
    pub(crate) fn session(&self) -> Result<Arc<SessionInner>, ClosedSession> {
        self.session.read().unwrap().upgrade().ok_or(ClosedSession)
    }

    pub async fn on_enter(&self) {
        self.hooks.clone().on_enter(self).await;
    }

    pub async fn on_exit(&self) {
        self.hooks.clone().on_exit(self).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

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

    #[tokio::test]
    async fn hooks_fire_on_enter_and_exit() {
        let enters = Arc::new(AtomicUsize::new(0));
        let exits = Arc::new(AtomicUsize::new(0));
        let agent = Agent::new("be helpful").with_hooks(Arc::new(CountingHooks {
            enters: enters.clone(),
            exits: exits.clone(),
        }));

        agent.on_enter().await;
        agent.on_exit().await;

        assert_eq!(enters.load(Ordering::SeqCst), 1);
        assert_eq!(exits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn session_accessor_reports_closed_before_attach() {
        let agent = Agent::new("x");
        assert!(agent.session().is_err());
    }
}
