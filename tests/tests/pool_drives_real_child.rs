//! §8 scenario 1 ("pool saturation"), driven against the *real*
//! `vagent_cli::run_child` protocol handler rather than a hand-rolled IPC
//! responder — the one thing `vagent-pool`'s own test module can't do
//! without depending on `vagent-cli`.
//!
//! `numIdleProcesses=2`, back-to-back launches of 3 jobs: the first two
//! should be served by already-warm processes; the third should wait for
//! a replacement to warm, and by the time it is served, a fourth process
//! should already be warming in its place.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::process::Child;

use vagent_cli::{run_child, AgentModule};
use vagent_config::RuntimeEnv;
use vagent_ipc::{Job, LoggerOptions, RunningJobInfo};
use vagent_pool::{PoolConfig, ProcessPool, SpawnFactory};
use vagent_providers::room::testing::InMemoryRoom;

fn test_runtime() -> Arc<RuntimeEnv> {
    Arc::new(RuntimeEnv::from_env())
}

fn counting_module(entries: Arc<AtomicUsize>) -> AgentModule {
    AgentModule::new(
        "test-agent",
        Arc::new(move |_ctx| {
            let entries = entries.clone();
            Box::pin(async move {
                entries.fetch_add(1, Ordering::SeqCst);
                // Stay alive until the parent asks for shutdown, like a
                // real session would for the lifetime of a call.
                std::future::pending::<()>().await;
            }) as BoxFuture<'static, ()>
        }),
        Arc::new(|| Arc::new(InMemoryRoom::new("assistant")) as Arc<dyn vagent_providers::Room>),
    )
}

fn running_job(id: &str) -> RunningJobInfo {
    RunningJobInfo {
        job: Job {
            id: id.into(),
            room_name: "room-a".into(),
            participant_identity: "caller".into(),
            agent_name: "assistant".into(),
            accept_identity: None,
            accept_metadata: None,
            accept_attributes: Default::default(),
        },
        url: "wss://example".into(),
        token: "tok".into(),
        worker_id: "worker-1".into(),
    }
}

/// Spawns `run_child` over an in-memory duplex in place of a real OS
/// process — the pool's own contract (`SpawnFactory`) doesn't care which.
fn child_spawn_factory(module: AgentModule, runtime: Arc<RuntimeEnv>) -> SpawnFactory<tokio::io::DuplexStream> {
    Arc::new(move || {
        let module = module.clone();
        let runtime = runtime.clone();
        Box::pin(async move {
            let (parent, child) = tokio::io::duplex(8192);
            tokio::spawn(async move {
                let _ = run_child(child, module, runtime).await;
            });
            Ok((1u32, parent, None))
        }) as BoxFuture<'static, std::io::Result<(u32, tokio::io::DuplexStream, Option<Child>)>>
    })
}

fn test_pool_config() -> PoolConfig {
    PoolConfig {
        num_idle_processes: 2,
        max_concurrent_initializations: 3,
        initialize_timeout: Duration::from_secs(2),
        close_timeout: Duration::from_millis(500),
        ping_interval: Duration::from_millis(100),
        ping_timeout: Duration::from_secs(1),
        high_ping_threshold: Duration::from_millis(100),
    }
}

#[tokio::test]
async fn third_assignment_waits_for_a_warmed_replacement() {
    let entries = Arc::new(AtomicUsize::new(0));
    let module = counting_module(entries.clone());
    let runtime = test_runtime();

    let pool = ProcessPool::new(
        test_pool_config(),
        LoggerOptions::default(),
        child_spawn_factory(module, runtime),
    );

    // First two jobs: served by already-warm processes, well within the
    // initialize timeout since nothing has to spawn fresh for them.
    let first = tokio::time::timeout(Duration::from_secs(2), pool.launch(running_job("job-1")))
        .await
        .expect("first job launched promptly")
        .unwrap();
    let second = tokio::time::timeout(Duration::from_secs(2), pool.launch(running_job("job-2")))
        .await
        .expect("second job launched promptly")
        .unwrap();

    // Third: no process is warm yet (both were just handed out), so this
    // has to wait for the supervision loop to spawn and initialize a
    // replacement. It must still resolve inside the initialize timeout.
    let third = tokio::time::timeout(Duration::from_secs(2), pool.launch(running_job("job-3")))
        .await
        .expect("third job eventually served by a freshly warmed replacement")
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(entries.load(Ordering::SeqCst), 3, "all three entrypoints actually ran");

    // A fourth process should already be warming in the freed slot left
    // by the third pickup (pool invariant: warm + in-flight-init +
    // in-use == numIdleProcesses, modulo transient gaps).
    let fourth = tokio::time::timeout(Duration::from_secs(2), pool.take_warm())
        .await
        .expect("a replacement is warming in the background");
    assert!(fourth.is_some());

    first.shutdown(None, Duration::from_millis(500)).await.unwrap();
    second.shutdown(None, Duration::from_millis(500)).await.unwrap();
    third.shutdown(None, Duration::from_millis(500)).await.unwrap();
    pool.close().await;
}
