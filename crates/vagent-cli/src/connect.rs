//! The `connect` subcommand (spec §6.4): same as `dev`, plus a line-based
//! stdin REPL that injects typed text as committed user turns once the
//! agent entry function has published its `AgentSession` — a keyboard
//! stand-in for the microphone, for testing an agent's conversational
//! behavior without any audio hardware.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};

use vagent_config::RuntimeEnv;

use crate::dev::spawn_dev_job;
use crate::options::AgentModule;

pub async fn run_connect(module: AgentModule, runtime: RuntimeEnv, room: String, participant: String) -> anyhow::Result<()> {
    let runtime = Arc::new(runtime);
    if let Some(prewarm) = &module.prewarm {
        prewarm(runtime.clone()).await;
    }

    let ctx = spawn_dev_job(&module, runtime, &room, &participant);
    ctx.connect().await?;

    tracing::info!(room, participant, "connected, waiting for the agent session to come up");
    let session = ctx.wait_for_session().await;
    println!("session ready. type a line and press enter to speak as {participant}; ctrl-d to quit.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            biased;
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => {
                match line? {
                    Some(text) if !text.trim().is_empty() => session.say_user_text(text).await,
                    Some(_) => {}
                    None => break,
                }
            }
        }
    }

    ctx.run_shutdown_callbacks().await;
    Ok(())
}
