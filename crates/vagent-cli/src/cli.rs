//! The `start`/`dev`/`connect` subcommands (spec §6.4) plus a hidden
//! `__run-job` subcommand that is never meant to be typed by a human — it's
//! how a spawned job process re-execs the same binary to become the child
//! side of the IPC protocol (see [`crate::child`]).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "vagent", about = "Voice agent worker runtime", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Register with the dispatch server and run a pool of warm job
    /// processes, handing each an assignment as it arrives.
    Start {
        /// Path to a TOML config file. Defaults to the platform config
        /// directory's `vagent/config.toml` if present.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Run a single job locally without a dispatch server: connects to a
    /// room directly (no subprocess, no IPC) and runs the agent entry
    /// function in-process, for interactive development.
    Dev {
        #[arg(long)]
        config: Option<PathBuf>,
        /// Room name to synthesize a local job assignment for.
        #[arg(long, default_value = "dev-room")]
        room: String,
        /// Participant identity the agent treats as the caller.
        #[arg(long, default_value = "dev-user")]
        participant: String,
    },
    /// Like `dev`, but also opens a line-based stdin REPL that injects
    /// typed text as committed user turns (bypassing STT/VAD) once the
    /// agent session is up.
    Connect {
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long, default_value = "dev-room")]
        room: String,
        #[arg(long, default_value = "dev-user")]
        participant: String,
    },
    /// Hidden re-exec entry point: becomes the child side of the IPC
    /// protocol over its inherited stdin/stdout. Not part of the public
    /// CLI surface — the worker's pool spawns this itself.
    #[command(name = "__run-job", hide = true)]
    RunJob,
}
