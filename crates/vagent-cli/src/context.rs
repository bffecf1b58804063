//! `JobContext` (spec §9 design notes, "context-local storage ->
//! explicit context parameter"): the value handed to the host's entry
//! function in place of the source's process-wide context-local. Carries
//! the assigned job, the resolved `RuntimeEnv`, the event bus, and the
//! job's `Room`; offers a slot the entry function publishes its
//! `AgentSession` into so `dev`/`connect` debug tooling can reach it, and
//! a shutdown-callback registry run during graceful shutdown.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use tokio::sync::watch;

use vagent_config::RuntimeEnv;
use vagent_events::EventBusRef;
use vagent_ipc::{Job, RunningJobInfo};
use vagent_providers::room::{Result as RoomResult, Room};
use vagent_session::AgentSession;

type ShutdownHook = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

struct JobContextInner {
    running_job: RunningJobInfo,
    runtime: Arc<RuntimeEnv>,
    events: EventBusRef,
    room: Arc<dyn Room>,
    shutdown_hooks: Mutex<Vec<ShutdownHook>>,
    session_tx: watch::Sender<Option<Arc<AgentSession>>>,
}

/// Cheaply cloneable (an `Arc` internally); the host's entry function and
/// the CLI subcommand that spawned it hold independent clones of the same
/// underlying job.
#[derive(Clone)]
pub struct JobContext {
    inner: Arc<JobContextInner>,
}

impl JobContext {
    pub fn new(running_job: RunningJobInfo, runtime: Arc<RuntimeEnv>, events: EventBusRef, room: Arc<dyn Room>) -> Self {
        let (session_tx, _rx) = watch::channel(None);
        Self {
            inner: Arc::new(JobContextInner {
                running_job,
                runtime,
                events,
                room,
                shutdown_hooks: Mutex::new(Vec::new()),
                session_tx,
            }),
        }
    }

    pub fn job(&self) -> &Job {
        &self.inner.running_job.job
    }

    pub fn running_job(&self) -> &RunningJobInfo {
        &self.inner.running_job
    }

    pub fn runtime(&self) -> &Arc<RuntimeEnv> {
        &self.inner.runtime
    }

    pub fn events(&self) -> &EventBusRef {
        &self.inner.events
    }

    pub fn room(&self) -> &Arc<dyn Room> {
        &self.inner.room
    }

    /// Connect this job's room using the token/url the worker synthesized
    /// on assignment (data model `Job`: "url, token").
    pub async fn connect(&self) -> RoomResult<()> {
        self.inner.room.connect(&self.inner.running_job.url, &self.inner.running_job.token).await
    }

    /// The entry function calls this once it has constructed its
    /// `AgentSession`, so out-of-band consumers of this same `JobContext`
    /// (the `dev`/`connect` CLI subcommands) can reach it.
    pub fn publish_session(&self, session: Arc<AgentSession>) {
        let _ = self.inner.session_tx.send(Some(session));
    }

    /// Block until the entry function has published a session (or
    /// forever, if it never does — callers that don't need this should
    /// not await it).
    pub async fn wait_for_session(&self) -> Arc<AgentSession> {
        let mut rx = self.inner.session_tx.subscribe();
        loop {
            if let Some(session) = rx.borrow().clone() {
                return session;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Register a callback run once, during graceful shutdown, before
    /// `exiting`/`done` are sent to the parent (§4.3's `shutdownRequest`:
    /// "run registered shutdown callbacks").
    pub fn add_shutdown_callback<F, Fut>(&self, cb: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let boxed: ShutdownHook = Box::new(move || Box::pin(cb()) as Pin<Box<dyn Future<Output = ()> + Send>>);
        self.inner.shutdown_hooks.lock().unwrap().push(boxed);
    }

    pub(crate) async fn run_shutdown_callbacks(&self) {
        let hooks = std::mem::take(&mut *self.inner.shutdown_hooks.lock().unwrap());
        for hook in hooks {
            hook().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use vagent_config::{SessionTuning, TransportCredentials, WorkerTuning};
    use vagent_events::NullEventBus;
    use vagent_providers::llm::testing::FakeLlm;
    use vagent_providers::room::testing::InMemoryRoom;
    use vagent_providers::stt::testing::FakeStt;
    use vagent_providers::tts::{testing::FakeTts, TtsFrame};
    use vagent_providers::turn::testing::FixedTurnDetector;
    use vagent_providers::vad::testing::FakeVad;
    use vagent_session::{Agent, SessionConfig, SessionProviders, TurnDetectionMode};

    fn test_runtime_env() -> RuntimeEnv {
        RuntimeEnv {
            transport: TransportCredentials::default(),
            worker: WorkerTuning::default(),
            session: SessionTuning::default(),
            logger: Default::default(),
        }
    }

    fn test_job_context() -> JobContext {
        let job = Job {
            id: "job-1".into(),
            room_name: "room-a".into(),
            participant_identity: "caller".into(),
            agent_name: "assistant".into(),
            accept_identity: None,
            accept_metadata: None,
            accept_attributes: Default::default(),
        };
        let running_job =
            RunningJobInfo { job, url: "wss://example".into(), token: "tok".into(), worker_id: "worker-1".into() };
        JobContext::new(
            running_job,
            Arc::new(test_runtime_env()),
            Arc::new(NullEventBus),
            Arc::new(InMemoryRoom::new("assistant")),
        )
    }

    struct DiscardSink;

    #[async_trait]
    impl vagent_session::AudioSink for DiscardSink {
        async fn push(&self, _frame: TtsFrame) {}
        async fn clear_buffer(&self) {}
    }

    fn test_session_providers() -> SessionProviders {
        SessionProviders {
            stt: Arc::new(FakeStt::new(vec![])),
            llm: Arc::new(FakeLlm::new(vec![])),
            tts: Arc::new(FakeTts::new(16_000)),
            vad: Arc::new(FakeVad::new(vec![])),
            turn_detector: Arc::new(FixedTurnDetector { probability: 0.9 }),
            sink: Arc::new(DiscardSink),
        }
    }

    #[tokio::test]
    async fn wait_for_session_resolves_after_publish() {
        let ctx = test_job_context();
        let waiter_ctx = ctx.clone();
        let waiter = tokio::spawn(async move { waiter_ctx.wait_for_session().await });

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        let events: EventBusRef = Arc::new(NullEventBus);
        let session = Arc::new(vagent_session::AgentSession::new(
            SessionConfig { tuning: SessionTuning::default(), turn_detection: TurnDetectionMode::Vad },
            test_session_providers(),
            events,
            Agent::new("x"),
        ));
        ctx.publish_session(session.clone());

        let resolved = waiter.await.unwrap();
        assert!(Arc::ptr_eq(&resolved, &session));
    }

    #[tokio::test]
    async fn shutdown_callbacks_run_once_in_order() {
        let ctx = test_job_context();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o1 = order.clone();
        ctx.add_shutdown_callback(move || async move {
            o1.lock().unwrap().push(1);
        });
        let o2 = order.clone();
        ctx.add_shutdown_callback(move || async move {
            o2.lock().unwrap().push(2);
        });

        ctx.run_shutdown_callbacks().await;
        ctx.run_shutdown_callbacks().await; // idempotent: nothing left to run

        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn job_and_running_job_accessors_expose_the_assigned_job() {
        let ctx = test_job_context();
        assert_eq!(ctx.job().id, "job-1");
        assert_eq!(ctx.running_job().worker_id, "worker-1");
    }
}
