//! Capability interfaces the session core depends on.
//!
//! Each trait is `Send + Sync` and object-safe via `async_trait`, the same
//! shape as the teacher's `SttEngine`/`VoiceActivityDetector`/`TurnDetector`
//! traits: plain methods plus a `Result<T>` built on a per-crate
//! `thiserror` enum. Concrete implementations (provider SDKs, a media
//! transport) live outside this crate entirely — the core only ever holds
//! a `Box<dyn Trait>` or `Arc<dyn Trait>`.

pub mod llm;
pub mod room;
pub mod stt;
pub mod turn;
pub mod tts;
pub mod vad;

pub use llm::{ChatChunk, ChatDelta, ChatRequest, ChatStream, Llm, Usage};
pub use room::{Participant, Room, RoomError, RoomEvent, TrackPublication};
pub use stt::{SpeechEvent, Stt, SttStream, SttStreamEvent};
pub use turn::TurnDetector;
pub use tts::{SynthesizeStream, Tts, TtsFrame};
pub use vad::{Vad, VadEvent, VadStream};

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider not ready: {0}")]
    NotReady(String),
    #[error("request failed: {0}")]
    RequestFailed(String),
    #[error("unsupported language: {0:?}")]
    UnsupportedLanguage(Option<String>),
    #[error("stream closed")]
    StreamClosed,
}

pub type Result<T> = std::result::Result<T, ProviderError>;
