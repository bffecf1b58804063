//! The `start` subcommand (spec §6.4, §4.1-4.3): register with a dispatch
//! server, keep a pool of warm job processes (each one this same binary,
//! re-exec'd with `__run-job`), and hand each assignment to a process as it
//! arrives. Runs until ctrl-c.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use vagent_config::{LoggerConfig, RuntimeEnv};
use vagent_events::EventBusRef;
use vagent_ipc::{Job, LoggerOptions, RunningJobInfo};
use vagent_pool::{spawn_child, ChildIo, PoolConfig, ProcessPool};
use vagent_worker::{JobInfoFactory, Worker, WorkerConfig, WorkerType};

use crate::options::AgentModule;

fn logger_options(cfg: &LoggerConfig) -> LoggerOptions {
    LoggerOptions { level: if cfg.level.is_empty() { None } else { Some(cfg.level.clone()) }, json: cfg.json }
}

/// Synthesizes the `RunningJobInfo` a child process needs to join its room
/// (spec §4.1: "synthesize a `RunningJobInfo`"). This core has no real
/// room-token-minting of its own — the url/token pair is a pass-through of
/// the worker's own transport credentials, same as every other host
/// collaborator this crate treats as opaque.
fn default_job_info_factory(runtime: Arc<RuntimeEnv>) -> JobInfoFactory {
    Arc::new(move |job: &Job, worker_id: &str| RunningJobInfo {
        job: job.clone(),
        url: runtime.transport.url.clone().unwrap_or_default(),
        token: runtime.transport.api_key.clone().unwrap_or_default(),
        worker_id: worker_id.to_string(),
    })
}

pub async fn run_start(module: AgentModule, runtime: RuntimeEnv) -> anyhow::Result<()> {
    let runtime = Arc::new(runtime);
    let dispatch_conn_factory = module
        .dispatch_conn_factory
        .clone()
        .ok_or_else(|| anyhow::anyhow!("`start` requires a host-supplied dispatch connection"))?;
    let conn = dispatch_conn_factory();

    let pool_config = PoolConfig::from_worker_tuning(&runtime.worker);
    let logger = logger_options(&runtime.logger);

    let spawn_factory: vagent_pool::SpawnFactory<ChildIo> = Arc::new(|| {
        Box::pin(async move {
            let exe = std::env::current_exe()?;
            let (pid, io, child) = spawn_child(exe, &["__run-job"])?;
            Ok((pid, io, Some(child)))
        })
    });

    let pool = Arc::new(ProcessPool::new(pool_config, logger, spawn_factory));
    let worker_config = WorkerConfig::from_worker_tuning(module.agent_name.clone(), WorkerType::Room, &runtime.worker);
    let job_info = default_job_info_factory(runtime.clone());
    let events: EventBusRef = Arc::new(crate::events::TracingEventBus);

    // `Worker` needs a concrete `DispatchConn`, not an `Arc<dyn DispatchConn>`
    // (it wraps its own `Arc` internally); this thin forwarder lets the
    // host-supplied trait object stand in for one.
    struct ConnHandle(Arc<dyn vagent_worker::DispatchConn>);

    #[async_trait::async_trait]
    impl vagent_worker::DispatchConn for ConnHandle {
        async fn connect(&self) -> Result<(), vagent_worker::DispatchError> {
            self.0.connect().await
        }
        async fn send(&self, msg: vagent_worker::OutboundMessage) -> Result<(), vagent_worker::DispatchError> {
            self.0.send(msg).await
        }
        async fn recv(&self) -> Option<vagent_worker::InboundMessage> {
            self.0.recv().await
        }
    }

    let worker = Worker::new(ConnHandle(conn), pool, worker_config, job_info, events);

    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("ctrl-c received, shutting down worker");
        cancel.cancel();
    });

    worker.run(token).await.map_err(anyhow::Error::from)
}
