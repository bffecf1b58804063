//! Audio recognition (§4.4): fans the room's microphone track out to VAD
//! and STT, tracks the user's current [`Turn`], and schedules end-of-turn
//! (EOU) commit with a cancellable "bounce" delay bounded by
//! `min`/`max_endpointing_delay`.
//!
//! Grounded in the teacher's `StreamingTranscriber`
//! (`crates/application/src/streaming.rs`): VAD speech-end flips a pending
//! flag, consumed and cleared by the owning loop, rather than committing
//! immediately — generalized here from a fixed post-VAD transcription count
//! to an LLM-scored end-of-turn probability plus a timing bound.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use vagent_chat::ChatContext;
use vagent_providers::stt::SttStreamEvent;
use vagent_providers::vad::VadEvent;
use vagent_providers::{ProviderError, Stt, TurnDetector, Vad};

#[derive(Debug, thiserror::Error)]
pub enum RecognitionError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Turn detection strategy (glossary "turnDetectionMode").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnDetectionMode {
    /// Commit as soon as VAD reports speech end.
    Vad,
    /// Consult a [`TurnDetector`] against the running chat context before
    /// committing.
    Semantic,
}

/// The user's in-progress turn: interim transcript plus whether VAD and/or
/// the turn detector consider it complete.
#[derive(Debug, Clone, Default)]
pub struct Turn {
    pub transcript: String,
    pub is_final: bool,
}

/// Outcome of one recognition step, surfaced to the session driver.
pub enum RecognitionEvent {
    /// An interim or final transcript update (mirrors
    /// `AgentEvent::UserInputTranscribed`).
    Transcript { text: String, is_final: bool },
    /// The turn should be committed to the chat context now.
    CommitTurn { text: String },
    /// VAD/STT detected the user started speaking; used to interrupt an
    /// in-progress assistant utterance.
    SpeechStarted,
}

/// Owns the current [`Turn`] and the cancellable EOU bounce task. One
/// instance per `AgentSession`.
pub struct RecognitionState {
    turn: Mutex<Turn>,
    eou_bounce: Mutex<Option<CancellationToken>>,
    mode: TurnDetectionMode,
    bounce_commits: mpsc::UnboundedSender<RecognitionEvent>,
}

impl RecognitionState {
    /// Construct a new state plus the receiving half of its bounce-commit
    /// channel: when a [`schedule_commit`](Self::schedule_commit) task
    /// decides to commit, it can't return the event directly (it runs on
    /// its own spawned task), so it sends it here instead. The owning
    /// session's recognition loop selects on this receiver alongside the
    /// STT/VAD streams.
    pub fn new(mode: TurnDetectionMode) -> (Self, mpsc::UnboundedReceiver<RecognitionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { turn: Mutex::new(Turn::default()), eou_bounce: Mutex::new(None), mode, bounce_commits: tx }, rx)
    }

    pub fn mode(&self) -> TurnDetectionMode {
        self.mode
    }

    pub async fn current_turn(&self) -> Turn {
        self.turn.lock().await.clone()
    }

    /// Fold one STT stream event into the current turn, returning the
    /// recognition events it produces.
    pub async fn handle_stt_event(&self, event: SttStreamEvent) -> Vec<RecognitionEvent> {
        match event {
            SttStreamEvent::StartOfSpeech => vec![RecognitionEvent::SpeechStarted],
            SttStreamEvent::Interim(speech) => {
                let mut turn = self.turn.lock().await;
                turn.transcript = speech.text().to_string();
                turn.is_final = false;
                vec![RecognitionEvent::Transcript { text: turn.transcript.clone(), is_final: false }]
            }
            SttStreamEvent::Final(speech) => {
                let mut turn = self.turn.lock().await;
                turn.transcript = speech.text().to_string();
                turn.is_final = true;
                vec![RecognitionEvent::Transcript { text: turn.transcript.clone(), is_final: true }]
            }
            SttStreamEvent::EndOfSpeech => vec![],
        }
    }

    /// Fold a VAD event in. `Vad` mode commits as soon as VAD reports
    /// speech end; `Semantic` mode only marks the turn final and leaves
    /// commit timing to [`schedule_commit`].
    pub async fn handle_vad_event(&self, event: VadEvent) -> Vec<RecognitionEvent> {
        match event {
            VadEvent::SpeechStart { .. } => vec![RecognitionEvent::SpeechStarted],
            VadEvent::SpeechEnd { .. } if self.mode == TurnDetectionMode::Vad => {
                let turn = self.turn.lock().await;
                if turn.transcript.is_empty() {
                    vec![]
                } else {
                    vec![RecognitionEvent::CommitTurn { text: turn.transcript.clone() }]
                }
            }
            VadEvent::SpeechEnd { .. } => {
                self.turn.lock().await.is_final = true;
                vec![]
            }
        }
    }

    /// Clear the current turn (§4.4 `clearUserTurn`).
    pub async fn clear_user_turn(&self) {
        *self.turn.lock().await = Turn::default();
        self.cancel_bounce().await;
    }

    /// Cancel any in-flight semantic-mode bounce without touching the
    /// transcript, used when the user starts speaking again before the
    /// previous utterance's EOU decision has fired.
    pub async fn cancel_pending_commit(&self) {
        self.cancel_bounce().await;
    }

    /// Force-commit the current turn regardless of EOU state (§4.4
    /// `commitUserTurn`).
    pub async fn commit_user_turn(&self) -> Option<String> {
        self.cancel_bounce().await;
        let mut turn = self.turn.lock().await;
        if turn.transcript.is_empty() {
            None
        } else {
            let text = std::mem::take(&mut turn.transcript);
            turn.is_final = false;
            Some(text)
        }
    }

    async fn cancel_bounce(&self) {
        if let Some(token) = self.eou_bounce.lock().await.take() {
            token.cancel();
        }
    }

    /// Schedule a semantic-mode EOU commit: wait `min_delay`, consult the
    /// turn detector against `chat_ctx` with the user's transcript
    /// appended, then either commit immediately (if confidence exceeds
    /// the detector's threshold) or wait out the remainder of `max_delay`
    /// before committing anyway. The commit itself is delivered through
    /// the receiver returned by [`Self::new`], since this runs on its own
    /// spawned task rather than the caller's. Returns the bounce's
    /// cancellation token so a fresh utterance/VAD speech-start can cancel
    /// it before it fires.
    pub async fn schedule_commit(
        self: &Arc<Self>,
        detector: Arc<dyn TurnDetector>,
        chat_ctx: ChatContext,
        min_delay: Duration,
        max_delay: Duration,
    ) -> CancellationToken {
        self.cancel_bounce().await;
        let token = CancellationToken::new();
        *self.eou_bounce.lock().await = Some(token.clone());

        let state = self.clone();
        let child = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = child.cancelled() => return,
                _ = tokio::time::sleep(min_delay) => {
                    let mut probe_ctx = chat_ctx;
                    let transcript = state.turn.lock().await.transcript.clone();
                    probe_ctx.append_user(transcript);

                    let threshold = detector.unlikely_threshold(None).unwrap_or(0.5);
                    let confident = detector
                        .predict_end_of_turn(&probe_ctx)
                        .await
                        .map(|p| p >= threshold)
                        .unwrap_or(true);

                    if !confident {
                        let remaining = max_delay.saturating_sub(min_delay);
                        tokio::select! {
                            biased;
                            _ = child.cancelled() => return,
                            _ = tokio::time::sleep(remaining) => {}
                        }
                    }
                }
            }

            let text = std::mem::take(&mut state.turn.lock().await.transcript);
            *state.eou_bounce.lock().await = None;
            if !text.is_empty() {
                let _ = state.bounce_commits.send(RecognitionEvent::CommitTurn { text });
            }
        });

        token
    }
}
