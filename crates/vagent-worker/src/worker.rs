//! `Worker::run` (spec §4.1): registers with the dispatch server, then
//! concurrently pings, reads server messages, and republishes load when
//! the pool's idle-slot count changes, until cancelled or a hard failure
//! occurs.
//!
//! Grounded in `crates/context/src/poller.rs`'s interval-driven background
//! loop (`ContextPoller::start_with_interval`), adapted from a
//! `std::thread` + `AtomicBool` poller to a single `tokio::select!` loop
//! since the rest of the worker is async. Ping/pong RTT thresholding
//! follows the same sample-compare-bump-status shape as
//! `crates/bus::PipelineStatus::update_lag`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use vagent_config::WorkerTuning;
use vagent_events::{AgentEvent, EventBusRef};
use vagent_ipc::{Job, RunningJobInfo};
use vagent_pool::{ProcessPool, RunningProcess};

use crate::dispatch::{DispatchConn, DispatchError, InboundMessage, OutboundMessage, WorkerType};

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub agent_name: String,
    pub worker_type: WorkerType,
    pub reconnect_initial_backoff: Duration,
    pub reconnect_max_backoff: Duration,
    pub max_unrecoverable_errors: u32,
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
    pub high_ping_threshold: Duration,
    pub close_timeout: Duration,
}

impl WorkerConfig {
    pub fn from_worker_tuning(agent_name: impl Into<String>, worker_type: WorkerType, tuning: &WorkerTuning) -> Self {
        Self {
            agent_name: agent_name.into(),
            worker_type,
            reconnect_initial_backoff: Duration::from_millis(500),
            reconnect_max_backoff: Duration::from_secs(30),
            max_unrecoverable_errors: tuning.max_unrecoverable_errors,
            ping_interval: tuning.ping_interval(),
            ping_timeout: tuning.ping_timeout(),
            high_ping_threshold: tuning.high_ping_threshold(),
            close_timeout: tuning.close_timeout(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionHealth {
    Healthy,
    Degraded,
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("too many unrecoverable errors ({0})")]
    TooManyUnrecoverableErrors(u32),
}

/// Builds the job-process-facing `RunningJobInfo` for an assigned job,
/// e.g. minting a room access token. Supplied by the host application —
/// the worker core has no opinion on how credentials are produced.
pub type JobInfoFactory = Arc<dyn Fn(&Job, &str) -> RunningJobInfo + Send + Sync>;

pub struct Worker<C, T>
where
    C: DispatchConn,
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    conn: Arc<C>,
    pool: Arc<ProcessPool<T>>,
    config: WorkerConfig,
    job_info: JobInfoFactory,
    events: EventBusRef,
    worker_id: Mutex<Option<String>>,
    healthy: AtomicBool,
    running_jobs: Mutex<HashMap<String, RunningProcess<T>>>,
}

impl<C, T> Worker<C, T>
where
    C: DispatchConn + 'static,
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(conn: C, pool: Arc<ProcessPool<T>>, config: WorkerConfig, job_info: JobInfoFactory, events: EventBusRef) -> Self {
        Self {
            conn: Arc::new(conn),
            pool,
            config,
            job_info,
            events,
            worker_id: Mutex::new(None),
            healthy: AtomicBool::new(true),
            running_jobs: Mutex::new(HashMap::new()),
        }
    }

    pub fn health(&self) -> ConnectionHealth {
        if self.healthy.load(Ordering::SeqCst) {
            ConnectionHealth::Healthy
        } else {
            ConnectionHealth::Degraded
        }
    }

    /// Connect, register, then run the ping/recv/load-report loop until
    /// `token` is cancelled or unrecoverable errors exceed the configured
    /// budget (§4.1's failure policy).
    pub async fn run(&self, token: CancellationToken) -> Result<(), WorkerError> {
        let mut backoff = self.config.reconnect_initial_backoff;
        let mut unrecoverable_errors = 0u32;

        loop {
            if token.is_cancelled() {
                return Ok(());
            }

            match self.connect_and_register().await {
                Ok(()) => {
                    backoff = self.config.reconnect_initial_backoff;
                    match self.session_loop(&token).await {
                        Ok(()) => return Ok(()),
                        Err(()) => {
                            unrecoverable_errors += 1;
                            tracing::warn!(unrecoverable_errors, "dispatch session ended with an error");
                        }
                    }
                }
                Err(err) => {
                    unrecoverable_errors += 1;
                    tracing::warn!(error = %err, unrecoverable_errors, "failed to connect to dispatch server");
                }
            }

            if unrecoverable_errors >= self.config.max_unrecoverable_errors {
                return Err(WorkerError::TooManyUnrecoverableErrors(unrecoverable_errors));
            }

            tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(()),
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(self.config.reconnect_max_backoff);
        }
    }

    async fn connect_and_register(&self) -> Result<(), DispatchError> {
        self.conn.connect().await?;
        self.conn
            .send(OutboundMessage::Register {
                agent_name: self.config.agent_name.clone(),
                worker_type: self.config.worker_type,
            })
            .await?;

        match self.conn.recv().await {
            Some(InboundMessage::RegisterAck { worker_id }) => {
                *self.worker_id.lock().await = Some(worker_id);
                Ok(())
            }
            Some(_) => Err(DispatchError::Transport("expected registerAck".into())),
            None => Err(DispatchError::Closed),
        }
    }

    /// One connected session: ping on an interval (reporting load
    /// alongside it) and react to inbound assignments/terminations, until
    /// the connection drops or `token` cancels.
    /// A single reader owns `conn.recv()` for the whole session so ping
    /// replies and server-initiated messages never race each other on the
    /// same channel; an outstanding ping is tracked locally and matched
    /// against the next `Pong` that arrives.
    async fn session_loop(&self, token: &CancellationToken) -> Result<(), ()> {
        let mut ping_tick = tokio::time::interval(self.config.ping_interval);
        ping_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut pending_ping: Option<std::time::Instant> = None;

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(()),
                _ = ping_tick.tick() => {
                    if let Some(sent_at) = pending_ping {
                        if sent_at.elapsed() > self.config.ping_timeout {
                            tracing::warn!("no pong within ping timeout, treating connection as lost");
                            return Err(());
                        }
                    }
                    let timestamp_ms = now_ms();
                    if self.conn.send(OutboundMessage::Ping { timestamp_ms }).await.is_err() {
                        return Err(());
                    }
                    pending_ping = Some(std::time::Instant::now());
                }
                message = self.conn.recv() => {
                    match message {
                        Some(InboundMessage::Assignment(job)) => self.handle_assignment(job).await,
                        Some(InboundMessage::Termination { job_id, reason }) => {
                            self.handle_termination(job_id, reason).await
                        }
                        Some(InboundMessage::Pong { .. }) => {
                            if let Some(sent_at) = pending_ping.take() {
                                self.record_ping_result(sent_at.elapsed()).await;
                            }
                        }
                        Some(InboundMessage::RegisterAck { .. }) => {}
                        None => return Err(()),
                    }
                }
            }
        }
    }

    async fn record_ping_result(&self, rtt: Duration) {
        let degraded = rtt > self.config.high_ping_threshold;
        self.healthy.store(!degraded, Ordering::SeqCst);
        if degraded {
            tracing::warn!(rtt_ms = rtt.as_millis() as u64, "dispatch connection degraded");
        }
        self.events.emit(AgentEvent::MetricsCollected {
            payload: serde_json::json!({ "rtt_ms": rtt.as_millis(), "degraded": degraded }),
        });
        self.report_load().await;
    }

    async fn report_load(&self) {
        let idle = self.pool.available_permits();
        let capacity = self.pool.config().num_idle_processes.max(1);
        let load = 1.0 - (idle as f32 / capacity as f32);
        let _ = self.conn.send(OutboundMessage::Availability { load, available: idle > 0 }).await;
    }

    /// §4.1's `on assignment(job)`: synthesize a `RunningJobInfo` and hand
    /// it to the pool; report unavailable if launch fails.
    async fn handle_assignment(&self, job: Job) {
        let worker_id = self.worker_id.lock().await.clone().unwrap_or_default();
        let job_id = job.id.clone();
        let info = (self.job_info)(&job, &worker_id);

        match self.pool.launch(info).await {
            Ok(running) => {
                self.running_jobs.lock().await.insert(job_id, running);
            }
            Err(err) => {
                tracing::warn!(error = %err, job_id, "failed to launch job on a warm process");
                let _ = self.conn.send(OutboundMessage::Availability { load: 1.0, available: false }).await;
            }
        }
    }

    /// §4.1's `on termination(reason)`: gracefully shut down the named
    /// job's executor, waiting up to the close-timeout, then kill.
    async fn handle_termination(&self, job_id: String, reason: Option<String>) {
        tracing::info!(job_id, ?reason, "dispatch server requested termination");

        let running = self.running_jobs.lock().await.remove(&job_id);
        if let Some(running) = running {
            if let Err(err) = running.shutdown(reason.clone(), self.config.close_timeout).await {
                tracing::warn!(error = %err, job_id, "job executor did not shut down cleanly");
            }
        }

        self.events.emit(AgentEvent::CloseEvent { reason: reason.unwrap_or_else(|| "termination".into()) });
    }
}
