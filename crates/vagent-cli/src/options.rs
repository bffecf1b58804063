//! The values a host binary supplies to the runtime (spec §1: "the entry
//! function is supplied by the host"; §9 design notes: "the source uses a
//! process-wide context-local to expose `JobContext` inside the entry
//! function — replace with an explicit context argument").
//!
//! `AgentModule` is the one value a host constructs once and passes to
//! [`crate::run_app`]/[`crate::run_dev`]/[`crate::run_connect`] — the
//! closest faithful stand-in for spec §6.4's "agent module path" that
//! doesn't require a dynamic plugin loader (see SPEC_FULL.md §4.11).

use std::sync::Arc;

use futures::future::BoxFuture;

use vagent_config::RuntimeEnv;
use vagent_providers::Room;
use vagent_worker::DispatchConn;

use crate::context::JobContext;

/// The per-job entry point: constructs an `AgentSession` (via
/// `vagent-session`) over the `JobContext`'s room and runs it to
/// completion. Supplied by the host, never by this crate.
pub type AgentEntry = Arc<dyn Fn(JobContext) -> BoxFuture<'static, ()> + Send + Sync>;

/// The agent module's `prewarm` hook (spec §4.2/glossary "Pre-warm"): runs
/// once per warmed process, before any job is assigned, so assignment
/// latency stays small (e.g. loading model weights).
pub type PrewarmFn = Arc<dyn Fn(Arc<RuntimeEnv>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Builds the `Room` a job process talks to. Kept as a factory rather
/// than a shared instance since each job process gets its own room
/// connection (spec §1: the media-transport SDK is an opaque
/// collaborator, out of this core's scope to construct for real).
pub type RoomFactory = Arc<dyn Fn() -> Arc<dyn Room> + Send + Sync>;

/// Builds the `start` subcommand's connection to a dispatch server. Like
/// `RoomFactory`, this crate never constructs a real one — the actual
/// dispatch-server wire protocol is, same as the media transport, an
/// opaque collaborator out of this core's scope (spec §1).
pub type DispatchConnFactory = Arc<dyn Fn() -> Arc<dyn DispatchConn> + Send + Sync>;

/// Everything the host supplies about the agent it wants run. One value,
/// constructed once in the host's `main`, threaded into every CLI
/// subcommand (`start`/`dev`/`connect`) and into the job-process child
/// runtime when it re-execs itself.
#[derive(Clone)]
pub struct AgentModule {
    pub agent_name: String,
    pub entrypoint: AgentEntry,
    pub prewarm: Option<PrewarmFn>,
    pub room_factory: RoomFactory,
    pub dispatch_conn_factory: Option<DispatchConnFactory>,
}

impl AgentModule {
    pub fn new(agent_name: impl Into<String>, entrypoint: AgentEntry, room_factory: RoomFactory) -> Self {
        Self { agent_name: agent_name.into(), entrypoint, prewarm: None, room_factory, dispatch_conn_factory: None }
    }

    pub fn with_prewarm(mut self, prewarm: PrewarmFn) -> Self {
        self.prewarm = Some(prewarm);
        self
    }

    pub fn with_dispatch_conn(mut self, factory: DispatchConnFactory) -> Self {
        self.dispatch_conn_factory = Some(factory);
        self
    }
}
