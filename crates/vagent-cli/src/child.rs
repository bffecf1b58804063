//! The job-process side of the parent<->child protocol (spec §4.3, §6.1).
//! Runs inside a process spawned by [`crate::start::run_start`]'s pool
//! (re-exec'd with the hidden `__run-job` subcommand, talking IPC over its
//! own stdin/stdout) and, for test purposes, over any duplex transport.
//!
//! Grounded in `vagent_pool::executor::JobExecutor`'s state machine
//! (`ExecutorStatus`) viewed from the opposite end of the same wire
//! protocol it drives.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;

use vagent_config::RuntimeEnv;
use vagent_ipc::{IpcCodec, IpcError, IpcMessage};
use vagent_pool::ExecutorStatus;

use crate::context::JobContext;
use crate::options::AgentModule;

fn now_ms() -> i64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}

/// Drive one job process end-to-end: reply to `initializeRequest` (running
/// `module.prewarm` first), `startJobRequest` (building a `JobContext` and
/// spawning `module.entrypoint`), `pingRequest`, and `shutdownRequest`
/// (running the context's shutdown callbacks then emitting `exiting` +
/// `done`). Returns once the parent closes the channel or shutdown
/// completes.
pub async fn run_child<T>(transport: T, module: AgentModule, runtime: Arc<RuntimeEnv>) -> Result<(), IpcError>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut framed = Framed::new(transport, IpcCodec::new());
    let mut status = ExecutorStatus::Spawning;
    let mut job_ctx: Option<JobContext> = None;
    let mut entry_task: Option<tokio::task::JoinHandle<()>> = None;

    loop {
        let incoming = tokio::select! {
            biased;
            msg = framed.next() => msg,
            result = wait_entry(&mut entry_task) => {
                // The entry function returned on its own (room disconnect,
                // normal completion) before the parent asked for shutdown.
                if result {
                    tracing::info!("job entrypoint finished on its own, self-initiating shutdown");
                    if let Some(ctx) = &job_ctx {
                        ctx.run_shutdown_callbacks().await;
                    }
                    let _ = framed.send(IpcMessage::Exiting { reason: Some("entrypoint finished".into()) }).await;
                    let _ = framed.send(IpcMessage::Done).await;
                }
                return Ok(());
            }
        };

        let Some(msg) = incoming else {
            tracing::warn!("parent closed the ipc channel");
            return Ok(());
        };
        let msg = msg?;
        let msg_kind = msg.kind();

        match msg {
            IpcMessage::InitializeRequest { logger_options: _, .. } => {
                status = ExecutorStatus::Initializing;
                if let Some(prewarm) = &module.prewarm {
                    prewarm(runtime.clone()).await;
                }
                status = ExecutorStatus::Idle;
                framed.send(IpcMessage::InitializeResponse).await?;
            }
            IpcMessage::PingRequest { timestamp } => {
                framed.send(IpcMessage::PongResponse { last_timestamp: timestamp, timestamp: now_ms() }).await?;
            }
            IpcMessage::StartJobRequest { running_job } => {
                status = ExecutorStatus::Running;
                let room = (module.room_factory)();
                let events: vagent_events::EventBusRef = Arc::new(vagent_events::NullEventBus);
                let ctx = JobContext::new(running_job, runtime.clone(), events, room);
                let entry_ctx = ctx.clone();
                let entrypoint = module.entrypoint.clone();
                entry_task = Some(tokio::spawn(async move {
                    entrypoint(entry_ctx).await;
                }));
                job_ctx = Some(ctx);
            }
            IpcMessage::ShutdownRequest { reason } => {
                status = ExecutorStatus::Draining;
                if let Some(ctx) = job_ctx.take() {
                    ctx.run_shutdown_callbacks().await;
                }
                if let Some(task) = entry_task.take() {
                    task.abort();
                }
                framed.send(IpcMessage::Exiting { reason }).await?;
                framed.send(IpcMessage::Done).await?;
                return Ok(());
            }
            IpcMessage::InferenceRequest { request_id, .. } => {
                // In-process inference indirection (e.g. a shared
                // turn-detector executor) is an optional extension point
                // (spec §4.3); this core has no shared inference executor
                // of its own, so it declines rather than hanging the
                // requester.
                framed
                    .send(IpcMessage::InferenceResponse {
                        request_id,
                        data: None,
                        error: Some("no inference executor configured".into()),
                    })
                    .await?;
            }
            IpcMessage::InferenceResponse { .. } | IpcMessage::InitializeResponse | IpcMessage::Exiting { .. } | IpcMessage::Done => {
                tracing::debug!(kind = msg_kind, ?status, "ignoring parent-unexpected message kind");
            }
        }
    }
}

/// Awaits the entry task if one is running; stays pending forever
/// (never wins the surrounding `select!`) if there isn't one yet, so the
/// loop falls through to `framed.next()` while idle/initializing.
async fn wait_entry(entry_task: &mut Option<tokio::task::JoinHandle<()>>) -> bool {
    match entry_task {
        Some(task) => {
            let _ = task.await;
            true
        }
        None => std::future::pending().await,
    }
}
