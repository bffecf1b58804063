//! `AgentSession`: the per-call conversation runtime (§4.4-§4.7). Owns the
//! chat context, the current [`Agent`], audio recognition, the speech
//! scheduler, the generation pipeline, and the tool executor.
//!
//! Module layout follows the teacher's `crates/application` split of one
//! file per pipeline stage (`streaming.rs`, `constants.rs`, ...) rather
//! than one monolithic session file.

mod agent;
mod generation;
mod recognition;
mod scheduler;
mod session;
mod tools;

pub use agent::{Agent, AgentHooks, ClosedSession, ProviderOverrides};
pub use generation::{AudioSink, GenerationError, GenerationOutcome, GenerationPipeline};
pub use recognition::{RecognitionError, RecognitionEvent, RecognitionState, Turn, TurnDetectionMode};
pub use scheduler::{SpeechHandle, SpeechHandleState, SpeechJob, SpeechPriority, SpeechScheduler};
pub use session::{AgentSession, SessionConfig, SessionProviders};
pub use tools::{Tool, ToolCtx, ToolError, ToolOutcome, ToolRegistry};
