//! The worker's dispatch-server control connection: a transport-agnostic
//! duplex of `OutboundMessage`/`InboundMessage`, implemented for the real
//! transport by the host application and faked here for tests. Mirrors the
//! `Room` capability trait's shape (`vagent-providers::room`) — connect,
//! push messages, subscribe to a stream of events — generalized to the
//! worker-to-dispatcher control channel instead of a media room.

use async_trait::async_trait;

use vagent_ipc::Job;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerType {
    Room,
    Publisher,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    Register { agent_name: String, worker_type: WorkerType },
    Ping { timestamp_ms: i64 },
    Availability { load: f32, available: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    RegisterAck { worker_id: String },
    Pong { timestamp_ms: i64 },
    Assignment(Job),
    Termination { job_id: String, reason: Option<String> },
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("connection closed")]
    Closed,
}

/// One authenticated duplex control connection to a dispatch server
/// (spec §4.1's "one authenticated duplex control connection").
#[async_trait]
pub trait DispatchConn: Send + Sync {
    async fn connect(&self) -> Result<(), DispatchError>;
    async fn send(&self, msg: OutboundMessage) -> Result<(), DispatchError>;
    /// Await the next server message; `None` means the connection closed.
    async fn recv(&self) -> Option<InboundMessage>;
}
