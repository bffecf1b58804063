//! Worker: the long-lived process that keeps a pool of warm job processes
//! and a dispatch-server control connection alive (spec §4.1).

mod dispatch;
mod worker;

pub use dispatch::{DispatchConn, DispatchError, InboundMessage, OutboundMessage, WorkerType};
pub use worker::{ConnectionHealth, JobInfoFactory, Worker, WorkerConfig, WorkerError};

#[cfg(test)]
mod tests {
    use super::*;
    use dispatch::testing::FakeDispatchConn;
    use std::sync::Arc;
    use std::time::Duration;
    use vagent_config::WorkerTuning;
    use vagent_events::{AgentEvent, EventBusRef, InMemoryEventBus};
    use vagent_ipc::{IpcCodec, IpcMessage, Job, LoggerOptions, RunningJobInfo};
    use vagent_pool::{PoolConfig, ProcessPool, SpawnFactory};

    fn test_pool() -> Arc<ProcessPool<tokio::io::DuplexStream>> {
        let config = PoolConfig {
            num_idle_processes: 1,
            max_concurrent_initializations: 1,
            initialize_timeout: Duration::from_millis(500),
            close_timeout: Duration::from_millis(500),
            ping_interval: Duration::from_millis(50),
            ping_timeout: Duration::from_millis(500),
            high_ping_threshold: Duration::from_millis(100),
        };

        let factory: SpawnFactory<tokio::io::DuplexStream> = Arc::new(|| {
            Box::pin(async move {
                use futures::{SinkExt, StreamExt};
                use tokio_util::codec::Framed;

                let (parent, child) = tokio::io::duplex(4096);
                tokio::spawn(async move {
                    let mut framed = Framed::new(child, IpcCodec::new());
                    if let Some(Ok(IpcMessage::InitializeRequest { .. })) = framed.next().await {
                        let _ = framed.send(IpcMessage::InitializeResponse).await;
                    }
                    while let Some(Ok(msg)) = framed.next().await {
                        match msg {
                            IpcMessage::PingRequest { timestamp } => {
                                let _ = framed
                                    .send(IpcMessage::PongResponse { last_timestamp: timestamp, timestamp })
                                    .await;
                            }
                            IpcMessage::ShutdownRequest { .. } => {
                                let _ = framed.send(IpcMessage::Exiting { reason: None }).await;
                                let _ = framed.send(IpcMessage::Done).await;
                                break;
                            }
                            _ => {}
                        }
                    }
                });
                Ok((1u32, parent, None))
            })
        });

        Arc::new(ProcessPool::new(config, LoggerOptions::default(), factory))
    }

    fn test_worker_config() -> WorkerConfig {
        WorkerConfig::from_worker_tuning("assistant", WorkerType::Room, &WorkerTuning {
            ping_interval_ms: 20,
            ping_timeout_ms: 200,
            high_ping_threshold_ms: 50,
            max_unrecoverable_errors: 2,
            ..WorkerTuning::default()
        })
    }

    #[tokio::test]
    async fn registers_then_reports_load_on_the_first_ping_tick() {
        let conn = FakeDispatchConn::new();
        let pool = test_pool();
        let bus = Arc::new(InMemoryEventBus::new());
        let events: EventBusRef = bus.clone();
        let job_info: JobInfoFactory = Arc::new(|job, worker_id| RunningJobInfo {
            job: job.clone(),
            url: "wss://example".into(),
            token: "tok".into(),
            worker_id: worker_id.to_string(),
        });

        conn.push(InboundMessage::RegisterAck { worker_id: "w-1".into() });
        for _ in 0..5 {
            conn.push(InboundMessage::Pong { timestamp_ms: 0 });
        }

        let worker = Worker::new(conn, pool, test_worker_config(), job_info, events);
        let token = tokio_util::sync::CancellationToken::new();
        let cancel = token.clone();

        let handle = tokio::spawn(async move { worker.run(token).await });
        tokio::time::sleep(Duration::from_millis(150)).await;
        cancel.cancel();
        let _ = handle.await.unwrap();

        assert!(!bus.is_empty());
        assert!(bus
            .events()
            .iter()
            .any(|e| matches!(e, AgentEvent::MetricsCollected { .. })));
    }

    #[tokio::test]
    async fn assignment_launches_a_job_and_termination_shuts_it_down() {
        let conn = FakeDispatchConn::new();
        let pool = test_pool();
        let bus = Arc::new(InMemoryEventBus::new());
        let events: EventBusRef = bus.clone();
        let job_info: JobInfoFactory = Arc::new(|job, worker_id| RunningJobInfo {
            job: job.clone(),
            url: "wss://example".into(),
            token: "tok".into(),
            worker_id: worker_id.to_string(),
        });

        conn.push(InboundMessage::RegisterAck { worker_id: "w-1".into() });
        conn.push(InboundMessage::Assignment(Job {
            id: "job-1".into(),
            room_name: "room-a".into(),
            participant_identity: "caller".into(),
            agent_name: "assistant".into(),
            accept_identity: None,
            accept_metadata: None,
            accept_attributes: Default::default(),
        }));
        // Give the assignment a moment to be picked up before termination
        // arrives right behind it in the same inbound queue.
        conn.push(InboundMessage::Termination { job_id: "job-1".into(), reason: Some("caller left".into()) });

        let worker = Worker::new(conn, pool, test_worker_config(), job_info, events);
        let token = tokio_util::sync::CancellationToken::new();
        let cancel = token.clone();

        let handle = tokio::spawn(async move { worker.run(token).await });
        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();
        let _ = handle.await.unwrap();

        assert!(bus
            .events()
            .iter()
            .any(|e| matches!(e, AgentEvent::CloseEvent { reason } if reason == "caller left")));
    }
}
