//! A single job process: spawn, IPC framing, state machine, memory
//! watchdog, graceful shutdown with hard-kill fallback (spec §4.3, data
//! model `JobProcess`).
//!
//! Grounded in `SttState`'s `RwLock`-guarded shared-state idiom
//! (`plugins/stt-worker/src/state.rs`) for the executor's own interior
//! state, and the memory watchdog's lock-free-atomics sampling pattern on
//! `crates/bus::PipelineStatus::update_lag` (sample on an interval,
//! compare to a threshold, log and/or flag).
//!
//! The state machine itself is generic over its transport (`T: AsyncRead +
//! AsyncWrite`) so it can be driven by a real child process in production
//! and by an in-memory duplex pipe in tests — the transport is where a
//! real process's stdin/stdout join into one `Framed` stream; the rest of
//! this module has no OS-process dependency at all.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::Child;
use tokio_util::codec::Framed;

use vagent_ipc::{IpcCodec, IpcError, IpcMessage, LoggerOptions, RunningJobInfo};

use crate::PoolConfig;

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("ipc error: {0}")]
    Ipc(#[from] IpcError),
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
    #[error("child exited before {0}")]
    ChildGone(&'static str),
    #[error("invalid state transition: {from:?} -> {to:?}")]
    InvalidTransition { from: ExecutorStatus, to: ExecutorStatus },
    #[error("unexpected reply {0}")]
    UnexpectedReply(&'static str),
}

/// `JobProcess.status`, per the data model: monotonic forward progression,
/// at most one job held over the executor's whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ExecutorStatus {
    Spawning,
    Initializing,
    Idle,
    Running,
    Draining,
    Dead,
}

impl ExecutorStatus {
    fn can_advance_to(self, next: ExecutorStatus) -> bool {
        next as u8 == self as u8 + 1 || next == ExecutorStatus::Dead
    }
}

/// Result of one memory sample against the configured thresholds (§4.3's
/// memory watchdog).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryVerdict {
    Ok,
    Warn,
    LimitExceeded,
}

/// A single job process, generic over its IPC transport.
pub struct JobExecutor<T> {
    pid: u32,
    framed: Framed<T, IpcCodec>,
    status: ExecutorStatus,
    running_job: Option<RunningJobInfo>,
    user_data: HashMap<String, serde_json::Value>,
    memory_sample_ring: VecDeque<u64>,
    last_ping_sent_at: Option<Instant>,
    child: Option<Child>,
}

const MEMORY_SAMPLE_RING_CAPACITY: usize = 120; // one minute at 500ms

impl<T> JobExecutor<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Wrap an already-connected transport (real child stdio, or an
    /// in-memory duplex in tests) as a fresh executor in `Spawning` state.
    pub fn from_transport(pid: u32, transport: T, child: Option<Child>) -> Self {
        Self {
            pid,
            framed: Framed::new(transport, IpcCodec::new()),
            status: ExecutorStatus::Spawning,
            running_job: None,
            user_data: HashMap::new(),
            memory_sample_ring: VecDeque::with_capacity(MEMORY_SAMPLE_RING_CAPACITY),
            last_ping_sent_at: None,
            child,
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn status(&self) -> ExecutorStatus {
        self.status
    }

    pub fn running_job(&self) -> Option<&RunningJobInfo> {
        self.running_job.as_ref()
    }

    pub fn user_data(&self) -> &HashMap<String, serde_json::Value> {
        &self.user_data
    }

    pub fn set_user_data(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.user_data.insert(key.into(), value);
    }

    fn transition(&mut self, next: ExecutorStatus) -> Result<(), ExecutorError> {
        if !self.status.can_advance_to(next) {
            return Err(ExecutorError::InvalidTransition { from: self.status, to: next });
        }
        tracing::debug!(pid = self.pid, from = ?self.status, to = ?next, "executor state transition");
        self.status = next;
        Ok(())
    }

    /// Send `initializeRequest` and await `initializeResponse` within
    /// `config.initialize_timeout()`; anything else (timeout, child exit,
    /// wrong reply) is treated as initialization failure (§4.2: "the
    /// executor is discarded and the `procSem` slot is released").
    pub async fn initialize(
        &mut self,
        logger_options: LoggerOptions,
        config: &PoolConfig,
    ) -> Result<(), ExecutorError> {
        self.transition(ExecutorStatus::Initializing)?;

        self.framed
            .send(IpcMessage::InitializeRequest {
                logger_options,
                ping_interval_ms: config.ping_interval.as_millis() as u64,
                ping_timeout_ms: config.ping_timeout.as_millis() as u64,
                high_ping_threshold_ms: config.high_ping_threshold.as_millis() as u64,
            })
            .await?;

        let reply = tokio::time::timeout(config.initialize_timeout, self.framed.next())
            .await
            .map_err(|_| ExecutorError::Timeout("initializeResponse"))?;

        match reply {
            Some(Ok(IpcMessage::InitializeResponse)) => {
                self.transition(ExecutorStatus::Idle)?;
                Ok(())
            }
            Some(Ok(other)) => Err(ExecutorError::UnexpectedReply(other.kind())),
            Some(Err(e)) => Err(e.into()),
            None => Err(ExecutorError::ChildGone("initializeResponse")),
        }
    }

    /// Hand this warm process a job (§4.2 `launch`): send `startJobRequest`
    /// and move `idle -> running`.
    pub async fn launch_job(&mut self, info: RunningJobInfo) -> Result<(), ExecutorError> {
        self.framed
            .send(IpcMessage::StartJobRequest { running_job: info.clone() })
            .await?;
        self.transition(ExecutorStatus::Running)?;
        self.running_job = Some(info);
        Ok(())
    }

    /// Send a ping carrying `now_ms` and await the matching pong within
    /// `ping_timeout`; returns the observed round-trip time.
    pub async fn ping(&mut self, now_ms: i64, ping_timeout: Duration) -> Result<Duration, ExecutorError> {
        let sent_at = Instant::now();
        self.last_ping_sent_at = Some(sent_at);
        self.framed.send(IpcMessage::PingRequest { timestamp: now_ms }).await?;

        let reply = tokio::time::timeout(ping_timeout, self.framed.next())
            .await
            .map_err(|_| ExecutorError::Timeout("pongResponse"))?;

        match reply {
            Some(Ok(IpcMessage::PongResponse { last_timestamp, .. })) if last_timestamp == now_ms => {
                Ok(sent_at.elapsed())
            }
            Some(Ok(other)) => Err(ExecutorError::UnexpectedReply(other.kind())),
            Some(Err(e)) => Err(e.into()),
            None => Err(ExecutorError::ChildGone("pongResponse")),
        }
    }

    /// Graceful shutdown: send `shutdownRequest`, wait up to
    /// `close_timeout` for `exiting` + `done`, then hard-kill (§4.2's
    /// close-timeout escalation, §4.3's `shutdownRequest` handling).
    pub async fn shutdown(&mut self, reason: Option<String>, close_timeout: Duration) -> Result<(), ExecutorError> {
        if self.status < ExecutorStatus::Draining {
            self.transition(ExecutorStatus::Draining)?;
        }

        if self.framed.send(IpcMessage::ShutdownRequest { reason }).await.is_ok() {
            let drained = tokio::time::timeout(close_timeout, self.drain_until_done()).await;
            if drained.is_ok() {
                self.status = ExecutorStatus::Dead;
                return Ok(());
            }
            tracing::warn!(pid = self.pid, "close timeout elapsed, escalating to kill");
        }

        self.kill().await
    }

    async fn drain_until_done(&mut self) {
        while let Some(Ok(msg)) = self.framed.next().await {
            if matches!(msg, IpcMessage::Done) {
                return;
            }
        }
    }

    /// Hard-kill the underlying process (SIGKILL equivalent). A no-op for
    /// test transports with no real child attached.
    pub async fn kill(&mut self) -> Result<(), ExecutorError> {
        if let Some(child) = self.child.as_mut() {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
        self.status = ExecutorStatus::Dead;
        Ok(())
    }

    /// Record one RSS sample (MB) against the configured thresholds.
    pub fn record_memory_sample(&mut self, rss_mb: u64, warn_mb: u64, limit_mb: u64) -> MemoryVerdict {
        if self.memory_sample_ring.len() == MEMORY_SAMPLE_RING_CAPACITY {
            self.memory_sample_ring.pop_front();
        }
        self.memory_sample_ring.push_back(rss_mb);

        if rss_mb > limit_mb {
            MemoryVerdict::LimitExceeded
        } else if rss_mb > warn_mb {
            MemoryVerdict::Warn
        } else {
            MemoryVerdict::Ok
        }
    }

    pub fn memory_samples(&self) -> &VecDeque<u64> {
        &self.memory_sample_ring
    }
}

/// Join a real child process's stdout/stdin into one `AsyncRead + AsyncWrite`
/// transport, since `Framed` needs a single duplex stream.
pub type ChildIo = tokio::io::Join<tokio::process::ChildStdout, tokio::process::ChildStdin>;

pub fn spawn_child(
    program: impl AsRef<std::ffi::OsStr>,
    args: &[impl AsRef<std::ffi::OsStr>],
) -> std::io::Result<(u32, ChildIo, Child)> {
    let mut command = tokio::process::Command::new(program);
    command
        .args(args)
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn()?;
    let pid = child.id().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::Other, "child exited before pid was available")
    })?;
    let stdin = child.stdin.take().expect("piped stdin");
    let stdout = child.stdout.take().expect("piped stdout");
    let io = tokio::io::join(stdout, stdin);
    Ok((pid, io, child))
}
