//! The parent<->child IPC envelope (spec §6.1): a length-prefixed framed
//! duplex channel carrying the tagged `IpcMessage` record. Concrete wire
//! encoding is implementation-defined by the spec as long as it's stable
//! and self-delimiting per message — this uses `tokio_util`'s
//! `LengthDelimitedCodec` for framing and `serde_json` for the payload,
//! the same pairing the teacher's `stt-worker` plugin depends on
//! (`tokio-util` + `dto.rs`'s serde wire structs) for worker<->child
//! communication, generalized from Tauri event payloads to a raw duplex
//! byte stream (pipe or socket) between a parent and a spawned child
//! process.

mod codec;

pub use codec::{IpcCodec, IpcError};

use serde::{Deserialize, Serialize};

/// One job assignment, handed from the parent to a child via
/// `startJobRequest` (data model `Job`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: String,
    pub room_name: String,
    pub participant_identity: String,
    pub agent_name: String,
    pub accept_identity: Option<String>,
    pub accept_metadata: Option<String>,
    pub accept_attributes: std::collections::HashMap<String, String>,
}

/// Everything a job process needs to join its room and report back,
/// synthesized by the worker on assignment (spec §4.1: "synthesize a
/// `RunningJobInfo`").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunningJobInfo {
    pub job: Job,
    pub url: String,
    pub token: String,
    pub worker_id: String,
}

/// Logger configuration forwarded to a child at `initializeRequest` time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct LoggerOptions {
    pub level: Option<String>,
    pub json: bool,
}

/// One message of the parent<->child protocol (spec §6.1's table). `P->C`
/// variants are sent by the parent, `C->P` by the child; `inferenceRequest`/
/// `inferenceResponse` flow either way.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum IpcMessage {
    InitializeRequest {
        logger_options: LoggerOptions,
        ping_interval_ms: u64,
        ping_timeout_ms: u64,
        high_ping_threshold_ms: u64,
    },
    InitializeResponse,
    PingRequest {
        timestamp: i64,
    },
    PongResponse {
        last_timestamp: i64,
        timestamp: i64,
    },
    StartJobRequest {
        running_job: RunningJobInfo,
    },
    ShutdownRequest {
        reason: Option<String>,
    },
    InferenceRequest {
        method: String,
        request_id: String,
        data: serde_json::Value,
    },
    InferenceResponse {
        request_id: String,
        data: Option<serde_json::Value>,
        error: Option<String>,
    },
    Exiting {
        reason: Option<String>,
    },
    Done,
}

impl IpcMessage {
    /// Best-effort variant name, for logging without dumping the payload.
    pub fn kind(&self) -> &'static str {
        match self {
            IpcMessage::InitializeRequest { .. } => "initializeRequest",
            IpcMessage::InitializeResponse => "initializeResponse",
            IpcMessage::PingRequest { .. } => "pingRequest",
            IpcMessage::PongResponse { .. } => "pongResponse",
            IpcMessage::StartJobRequest { .. } => "startJobRequest",
            IpcMessage::ShutdownRequest { .. } => "shutdownRequest",
            IpcMessage::InferenceRequest { .. } => "inferenceRequest",
            IpcMessage::InferenceResponse { .. } => "inferenceResponse",
            IpcMessage::Exiting { .. } => "exiting",
            IpcMessage::Done => "done",
        }
    }
}
