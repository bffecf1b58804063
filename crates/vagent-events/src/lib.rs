//! Typed agent session events.
//!
//! `AgentSession` events (`UserInputTranscribed`, `AgentStateChanged`,
//! `MetricsCollected`, etc.) are modeled as a single tagged sum delivered
//! over one fan-out channel the session owns, per the "event emitters ->
//! typed channels" design note: listeners subscribe by matching on variant,
//! there is no global emitter state.

mod bus;

pub use bus::{EventBus, EventBusRef, InMemoryEventBus, NullEventBus};

use serde::{Deserialize, Serialize};

/// Agent session lifecycle state, mirrored to hosts/observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Initializing,
    Listening,
    Thinking,
    Speaking,
    Idle,
}

/// One event in the agent session's typed event stream.
///
/// Producers: `vagent-session` (recognition, scheduler, generation pipeline,
/// tool executor). Consumers: the IPC layer (forwarded to the parent
/// process), the CLI's `connect` mode, and tests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum AgentEvent {
    /// STT produced an interim or final transcript for the user's turn.
    UserInputTranscribed { transcript: String, is_final: bool },
    /// The session's coarse-grained state changed.
    AgentStateChanged { old: AgentState, new: AgentState },
    /// A new `SpeechHandle` was enqueued (see §4.5).
    SpeechCreated {
        speech_id: String,
        priority: u8,
        source: SpeechSource,
    },
    /// Playout of a speech handle finished, interrupted or not (§4.5, §7).
    PlaybackFinished {
        speech_id: String,
        interrupted: bool,
        playback_position_ms: u64,
    },
    /// A chat context item was appended (user, assistant, tool-call, or
    /// tool-output).
    ConversationItemAdded { item_id: String, role: String },
    /// Periodic pipeline/connection metrics snapshot.
    MetricsCollected { payload: serde_json::Value },
    /// A non-fatal provider or tool error surfaced to the session.
    ErrorEvent { source: String, error: String },
    /// The session closed.
    CloseEvent { reason: String },
}

/// Where a `SpeechHandle` originated, per §4.5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeechSource {
    Say,
    GenerateReply,
    ToolResponse,
}

/// Event name constants, to prevent typos at IPC/CLI boundaries.
pub mod event_names {
    pub const USER_INPUT_TRANSCRIBED: &str = "agent:user_input_transcribed";
    pub const AGENT_STATE_CHANGED: &str = "agent:state_changed";
    pub const SPEECH_CREATED: &str = "agent:speech_created";
    pub const PLAYBACK_FINISHED: &str = "agent:playback_finished";
    pub const CONVERSATION_ITEM_ADDED: &str = "agent:conversation_item_added";
    pub const METRICS_COLLECTED: &str = "agent:metrics_collected";
    pub const ERROR_EVENT: &str = "agent:error";
    pub const CLOSE_EVENT: &str = "agent:close";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_input_transcribed_roundtrips() {
        let event = AgentEvent::UserInputTranscribed {
            transcript: "hello world".into(),
            is_final: true,
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: AgentEvent = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, AgentEvent::UserInputTranscribed { is_final: true, .. }));
    }

    #[test]
    fn playback_finished_interrupted_field_present() {
        let event = AgentEvent::PlaybackFinished {
            speech_id: "sp-1".into(),
            interrupted: true,
            playback_position_ms: 400,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["interrupted"], serde_json::json!(true));
        assert_eq!(json["playback_position_ms"], serde_json::json!(400));
    }
}
