//! Binary-facing entry point (spec §6.4): `start`/`dev`/`connect`
//! subcommands, the job-process child runtime, and the `RuntimeEnv`/
//! `tracing` bootstrap a host's `main` wraps around its `AgentModule`.
//!
//! A host binary is expected to look like:
//!
//! ```ignore
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let module = AgentModule::new("my-agent", my_entry, my_room_factory)
//!         .with_prewarm(my_prewarm)
//!         .with_dispatch_conn(my_dispatch_conn_factory);
//!     vagent_cli::run(module).await
//! }
//! ```

mod child;
mod cli;
mod connect;
mod context;
mod dev;
mod events;
mod options;
mod start;

pub use child::run_child;
pub use cli::{Cli, Command};
pub use context::JobContext;
pub use options::{AgentEntry, AgentModule, DispatchConnFactory, PrewarmFn, RoomFactory};

use clap::Parser;
use vagent_config::RuntimeEnv;

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,vagent=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}

/// Parse `std::env::args`, bootstrap tracing, and run whichever subcommand
/// was requested. The one function a host's `main` calls.
pub async fn run(module: AgentModule) -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Start { config } => {
            let runtime = RuntimeEnv::load(config.as_deref())?;
            start::run_start(module, runtime).await
        }
        Command::Dev { config, room, participant } => {
            let runtime = RuntimeEnv::load(config.as_deref())?;
            dev::run_dev(module, runtime, room, participant).await
        }
        Command::Connect { config, room, participant } => {
            let runtime = RuntimeEnv::load(config.as_deref())?;
            connect::run_connect(module, runtime, room, participant).await
        }
        Command::RunJob => {
            let runtime = std::sync::Arc::new(RuntimeEnv::from_env());
            let transport = tokio::io::join(tokio::io::stdin(), tokio::io::stdout());
            run_child(transport, module, runtime).await.map_err(anyhow::Error::from)
        }
    }
}
