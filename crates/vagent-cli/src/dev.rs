//! The `dev` subcommand (spec §6.4): runs one job locally, in-process, with
//! no dispatch server and no child process — just the agent entry function
//! over a synthesized `RunningJobInfo`, so a host can iterate on their
//! agent without standing up the full worker/pool machinery.

use std::sync::Arc;

use vagent_config::RuntimeEnv;
use vagent_events::EventBusRef;
use vagent_ipc::{Job, RunningJobInfo};

use crate::context::JobContext;
use crate::options::AgentModule;

fn synthesize_running_job(runtime: &RuntimeEnv, room: &str, participant: &str, agent_name: &str) -> RunningJobInfo {
    RunningJobInfo {
        job: Job {
            id: "dev-job".into(),
            room_name: room.to_string(),
            participant_identity: participant.to_string(),
            agent_name: agent_name.to_string(),
            accept_identity: None,
            accept_metadata: None,
            accept_attributes: Default::default(),
        },
        url: runtime.transport.url.clone().unwrap_or_else(|| "ws://localhost".into()),
        token: runtime.transport.api_key.clone().unwrap_or_else(|| "dev-token".into()),
        worker_id: "dev-worker".into(),
    }
}

/// Build the `JobContext` and spawn the agent entry function; shared by
/// `dev` and `connect` so the latter only adds a REPL on top.
pub(crate) fn spawn_dev_job(module: &AgentModule, runtime: Arc<RuntimeEnv>, room: &str, participant: &str) -> JobContext {
    let running_job = synthesize_running_job(&runtime, room, participant, &module.agent_name);
    let events: EventBusRef = Arc::new(crate::events::TracingEventBus);
    let room_handle = (module.room_factory)();
    let ctx = JobContext::new(running_job, runtime, events, room_handle);

    let entry_ctx = ctx.clone();
    let entrypoint = module.entrypoint.clone();
    tokio::spawn(async move {
        entrypoint(entry_ctx).await;
    });

    ctx
}

pub async fn run_dev(module: AgentModule, runtime: RuntimeEnv, room: String, participant: String) -> anyhow::Result<()> {
    let runtime = Arc::new(runtime);
    if let Some(prewarm) = &module.prewarm {
        prewarm(runtime.clone()).await;
    }

    let ctx = spawn_dev_job(&module, runtime, &room, &participant);
    ctx.connect().await?;

    tracing::info!(room, participant, "dev job running, press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    ctx.run_shutdown_callbacks().await;
    Ok(())
}
