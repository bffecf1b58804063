//! The warm-process queue (spec §4.2): a supervision loop keeps
//! `num_idle_processes` processes spawned, initializing and warm at all
//! times, bounding concurrent initialization with a second semaphore.
//!
//! Grounded in the teacher's `ContextPoller` (`crates/context/src/poller.rs`)
//! for the background-loop-with-cancellation shape, generalized from a
//! single polling thread to a semaphore-gated fan-out of supervised child
//! processes.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::Child;
use tokio::sync::{mpsc, Mutex, OwnedSemaphorePermit, Semaphore};

use vagent_concurrency::CancellableTask;
use vagent_config::WorkerTuning;
use vagent_ipc::{LoggerOptions, RunningJobInfo};

use crate::executor::{ExecutorError, JobExecutor};

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub num_idle_processes: usize,
    pub max_concurrent_initializations: usize,
    pub initialize_timeout: Duration,
    pub close_timeout: Duration,
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
    pub high_ping_threshold: Duration,
}

impl PoolConfig {
    pub fn from_worker_tuning(tuning: &WorkerTuning) -> Self {
        Self {
            num_idle_processes: tuning.num_idle_processes,
            max_concurrent_initializations: tuning.max_concurrent_initializations,
            initialize_timeout: tuning.initialize_timeout(),
            close_timeout: tuning.close_timeout(),
            ping_interval: tuning.ping_interval(),
            ping_timeout: tuning.ping_timeout(),
            high_ping_threshold: tuning.high_ping_threshold(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("pool is closed")]
    Closed,
    #[error(transparent)]
    Executor(#[from] ExecutorError),
}

/// Builds one connected transport for a fresh job process: spawn the OS
/// process (or, in tests, hand back one end of an in-memory duplex) and
/// return its pid, transport, and optional `Child` handle for killing.
pub type SpawnFactory<T> =
    Arc<dyn Fn() -> BoxFuture<'static, std::io::Result<(u32, T, Option<Child>)>> + Send + Sync>;

/// A warmed, initialized process sitting in the queue. Holds its
/// `procSem` permit so the slot counts against `num_idle_processes` for
/// its entire life, not just while queued.
pub struct WarmProcess<T> {
    pub executor: JobExecutor<T>,
    permit: OwnedSemaphorePermit,
}

impl<T> WarmProcess<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Hand this process its job (§4.2 `launch`). The permit travels with
    /// the executor into the returned handle.
    pub async fn launch(mut self, info: RunningJobInfo) -> Result<RunningProcess<T>, ExecutorError> {
        self.executor.launch_job(info).await?;
        Ok(RunningProcess { executor: self.executor, _permit: self.permit })
    }
}

/// A process actively running a job. Dropping this releases the
/// `procSem` permit, letting the supervision loop spawn a replacement.
pub struct RunningProcess<T> {
    pub executor: JobExecutor<T>,
    _permit: OwnedSemaphorePermit,
}

impl<T> RunningProcess<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub async fn ping(&mut self, now_ms: i64, ping_timeout: Duration) -> Result<Duration, ExecutorError> {
        self.executor.ping(now_ms, ping_timeout).await
    }

    pub async fn shutdown(mut self, reason: Option<String>, close_timeout: Duration) -> Result<(), ExecutorError> {
        self.executor.shutdown(reason, close_timeout).await
    }
}

pub struct ProcessPool<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    warm_rx: Mutex<mpsc::Receiver<WarmProcess<T>>>,
    proc_sem: Arc<Semaphore>,
    supervisor: CancellableTask<()>,
    config: PoolConfig,
}

impl<T> ProcessPool<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(config: PoolConfig, logger_options: LoggerOptions, factory: SpawnFactory<T>) -> Self {
        let proc_sem = Arc::new(Semaphore::new(config.num_idle_processes));
        let init_sem = Arc::new(Semaphore::new(config.max_concurrent_initializations.max(1)));
        let (warm_tx, warm_rx) = mpsc::channel(config.num_idle_processes.max(1));

        let loop_proc_sem = proc_sem.clone();
        let loop_config = config.clone();

        let supervisor = CancellableTask::spawn(move |token| async move {
            loop {
                let permit = tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    permit = loop_proc_sem.clone().acquire_owned() => match permit {
                        Ok(p) => p,
                        Err(_) => break,
                    },
                };

                let init_sem = init_sem.clone();
                let factory = factory.clone();
                let warm_tx = warm_tx.clone();
                let config = loop_config.clone();
                let logger_options = logger_options.clone();

                tokio::spawn(async move {
                    let init_permit = match init_sem.acquire_owned().await {
                        Ok(p) => p,
                        Err(_) => return,
                    };

                    let spawned = factory().await;
                    drop(init_permit);

                    let (pid, io, child) = match spawned {
                        Ok(v) => v,
                        Err(err) => {
                            tracing::warn!(error = %err, "failed to spawn job process");
                            return;
                        }
                    };

                    let mut executor = JobExecutor::from_transport(pid, io, child);
                    if let Err(err) = executor.initialize(logger_options, &config).await {
                        tracing::warn!(error = %err, pid, "job process failed to initialize");
                        let _ = executor.kill().await;
                        return;
                    }

                    let warm = WarmProcess { executor, permit };
                    let _ = warm_tx.send(warm).await;
                });
            }
        });

        Self {
            warm_rx: Mutex::new(warm_rx),
            proc_sem,
            supervisor,
            config,
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Warm slots the supervision loop is still allowed to fill (§4.2
    /// `procSem`'s available count).
    pub fn available_permits(&self) -> usize {
        self.proc_sem.available_permits()
    }

    /// Pop the head of the warm queue (§4.2 `launch`), awaiting if empty.
    pub async fn take_warm(&self) -> Option<WarmProcess<T>> {
        let mut rx = self.warm_rx.lock().await;
        rx.recv().await
    }

    /// Pop the next warm process and hand it `info` (spec §4.1's
    /// `pool.launch(info)`).
    pub async fn launch(&self, info: RunningJobInfo) -> Result<RunningProcess<T>, PoolError> {
        let warm = self.take_warm().await.ok_or(PoolError::Closed)?;
        Ok(warm.launch(info).await?)
    }

    /// Stop the supervision loop and kill every process still sitting in
    /// the warm queue (§4.2 `close`).
    pub async fn close(self) {
        let _ = self.supervisor.gracefully_cancel().await;

        let mut rx = self.warm_rx.lock().await;
        rx.close();
        while let Ok(warm) = rx.try_recv() {
            let mut executor = warm.executor;
            let _ = executor.kill().await;
        }
    }
}
