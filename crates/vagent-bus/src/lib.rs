//! Low-latency audio bus between the room's subscribed microphone track and
//! the recognition pipeline (VAD + STT fan-out, see `vagent-session`).
//!
//! Provides zero-copy frame delivery with bounded latency: producers never
//! block the audio callback, consumers see a monotonic sequence with gap
//! detection.

use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Standard sample rate for STT processing (16kHz), per §6.3.
pub const SAMPLE_RATE: u32 = 16000;

/// Duration of each audio frame in milliseconds.
pub const FRAME_DURATION_MS: u32 = 50;

/// Number of samples per frame at the standard sample rate.
pub const FRAME_SAMPLES: usize = (SAMPLE_RATE as usize * FRAME_DURATION_MS as usize) / 1000;

/// Default buffer capacity in milliseconds.
pub const DEFAULT_BUFFER_CAPACITY_MS: u32 = 1500;

/// A single audio frame with timestamp and sequence number for ordering.
///
/// This is the internal representation of §6.3's `AudioFrame`: 16-bit PCM
/// at the negotiated rate, decoded to `f32` samples in `[-1.0, 1.0]` for
/// zero-copy sharing across the VAD/STT fan-out.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Monotonic sequence number for ordering.
    pub seq: u64,
    /// Timestamp in milliseconds (wall clock when the frame was captured).
    pub ts_ms: i64,
    /// Sample rate of the audio data.
    pub sample_rate: u32,
    /// Audio samples (shared ownership for zero-copy fan-out).
    pub samples: Arc<[f32]>,
}

impl AudioFrame {
    /// Create a new audio frame.
    pub fn new(seq: u64, ts_ms: i64, sample_rate: u32, samples: impl Into<Arc<[f32]>>) -> Self {
        Self {
            seq,
            ts_ms,
            sample_rate,
            samples: samples.into(),
        }
    }

    /// Duration of this frame in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.samples.len() as u64 * 1000) / self.sample_rate as u64
    }
}

/// Configuration for the audio bus.
#[derive(Debug, Clone)]
pub struct AudioBusConfig {
    /// Target buffer capacity in milliseconds.
    pub capacity_ms: u32,
    /// Expected frame size in milliseconds (for calculating channel capacity).
    pub frame_size_ms: u32,
}

impl Default for AudioBusConfig {
    fn default() -> Self {
        Self {
            capacity_ms: DEFAULT_BUFFER_CAPACITY_MS,
            frame_size_ms: FRAME_DURATION_MS,
        }
    }
}

impl AudioBusConfig {
    /// Calculate channel capacity in number of frames.
    fn channel_capacity(&self) -> usize {
        if self.frame_size_ms == 0 {
            return 32;
        }
        ((self.capacity_ms / self.frame_size_ms) as usize).max(8)
    }
}

/// Sender half of the audio bus.
#[derive(Clone)]
pub struct AudioBusSender {
    tx: mpsc::Sender<AudioFrame>,
    seq_counter: Arc<AtomicU64>,
    dropped_frames: Arc<AtomicU64>,
}

impl AudioBusSender {
    /// Send an audio frame, dropping the new frame if the buffer is full.
    ///
    /// Returns true if sent successfully, false if dropped. Used on the hot
    /// path (room subscription callback) where blocking is never correct.
    pub fn send(&self, ts_ms: i64, sample_rate: u32, samples: impl Into<Arc<[f32]>>) -> bool {
        let seq = self.seq_counter.fetch_add(1, Ordering::Relaxed);
        let frame = AudioFrame::new(seq, ts_ms, sample_rate, samples);

        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                let dropped = self.dropped_frames.fetch_add(1, Ordering::Relaxed) + 1;
                // Rate-limit logging: only log every 10th drop to avoid spam.
                if dropped % 10 == 1 {
                    tracing::warn!(dropped, seq, "Audio bus full, dropping frames");
                }
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("Audio bus closed");
                false
            }
        }
    }

    /// Send an audio frame, suspending until space is available.
    pub async fn send_async(
        &self,
        ts_ms: i64,
        sample_rate: u32,
        samples: impl Into<Arc<[f32]>>,
    ) -> bool {
        let seq = self.seq_counter.fetch_add(1, Ordering::Relaxed);
        let frame = AudioFrame::new(seq, ts_ms, sample_rate, samples);

        match self.tx.send(frame).await {
            Ok(()) => true,
            Err(_) => {
                tracing::debug!("Audio bus closed");
                false
            }
        }
    }

    /// Get the number of dropped frames.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    /// Reset the dropped-frame counter.
    pub fn reset_dropped_frames(&self) {
        self.dropped_frames.store(0, Ordering::Relaxed);
    }

    /// Get the current sequence number.
    pub fn current_seq(&self) -> u64 {
        self.seq_counter.load(Ordering::Relaxed)
    }
}

/// Receiver half of the audio bus.
pub struct AudioBusReceiver {
    rx: mpsc::Receiver<AudioFrame>,
    last_seq: u64,
    gaps_detected: u64,
}

impl AudioBusReceiver {
    /// Receive the next audio frame.
    pub async fn recv(&mut self) -> Option<AudioFrame> {
        let frame = self.rx.recv().await?;
        self.track_gap(&frame);
        Some(frame)
    }

    /// Try to receive a frame without blocking.
    pub fn try_recv(&mut self) -> Option<AudioFrame> {
        match self.rx.try_recv() {
            Ok(frame) => {
                self.track_gap(&frame);
                Some(frame)
            }
            Err(_) => None,
        }
    }

    fn track_gap(&mut self, frame: &AudioFrame) {
        if self.last_seq > 0 && frame.seq > self.last_seq + 1 {
            let gap = frame.seq - self.last_seq - 1;
            self.gaps_detected += gap;
            tracing::debug!(
                "Audio bus gap detected: {} frames missing (seq {} -> {})",
                gap,
                self.last_seq,
                frame.seq
            );
        }
        self.last_seq = frame.seq;
    }

    /// Get the number of gaps (missing frames) detected.
    pub fn gaps_detected(&self) -> u64 {
        self.gaps_detected
    }

    /// Drain all available frames, keeping only the most recent.
    ///
    /// Useful for catching up after the recognition pipeline lags behind
    /// the room's audio track.
    pub fn drain_to_latest(&mut self) -> Option<AudioFrame> {
        let mut latest = None;
        let mut drained = 0;

        while let Some(frame) = self.try_recv() {
            drained += 1;
            latest = Some(frame);
        }

        if drained > 1 {
            tracing::debug!("Drained {} frames from audio bus", drained - 1);
        }

        latest
    }
}

/// Audio bus for low-latency frame delivery from room input to recognition.
pub struct AudioBus {
    sender: AudioBusSender,
    receiver: Option<AudioBusReceiver>,
}

impl AudioBus {
    /// Create a new audio bus with default configuration.
    pub fn new() -> Self {
        Self::with_config(AudioBusConfig::default())
    }

    /// Create a new audio bus with custom configuration.
    pub fn with_config(config: AudioBusConfig) -> Self {
        let capacity = config.channel_capacity();
        let (tx, rx) = mpsc::channel(capacity);

        tracing::debug!(
            "Created audio bus: capacity={}ms (~{} frames of {}ms)",
            config.capacity_ms,
            capacity,
            config.frame_size_ms
        );

        Self {
            sender: AudioBusSender {
                tx,
                seq_counter: Arc::new(AtomicU64::new(0)),
                dropped_frames: Arc::new(AtomicU64::new(0)),
            },
            receiver: Some(AudioBusReceiver {
                rx,
                last_seq: 0,
                gaps_detected: 0,
            }),
        }
    }

    /// Get a clone of the sender.
    pub fn sender(&self) -> AudioBusSender {
        self.sender.clone()
    }

    /// Take the receiver (can only be done once — the reader-owns-the-stream
    /// rule from §3's data-model ownership section).
    pub fn take_receiver(&mut self) -> Option<AudioBusReceiver> {
        self.receiver.take()
    }
}

impl Default for AudioBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Real-time pipeline metrics with atomic fields for lock-free updates.
///
/// Shared via `Arc<PipelineStatus>` and updated from the recognition hot
/// path without locks.
#[derive(Debug)]
pub struct PipelineStatus {
    /// Current audio lag in milliseconds (now - last frame timestamp).
    audio_lag_ms: AtomicI64,
    /// Last inference duration in milliseconds.
    inference_time_ms: AtomicU64,
    /// Real-time factor (inference_time / audio_duration), stored as f32 bits.
    real_time_factor_bits: AtomicU32,
    /// Total dropped frames since start.
    dropped_frames: AtomicU64,
    /// Total gaps detected (missing sequence numbers).
    gaps_detected: AtomicU64,
    /// Number of frames processed.
    frames_processed: AtomicU64,
    /// Total audio duration processed in milliseconds.
    audio_processed_ms: AtomicU64,
}

impl Default for PipelineStatus {
    fn default() -> Self {
        Self {
            audio_lag_ms: AtomicI64::new(0),
            inference_time_ms: AtomicU64::new(0),
            real_time_factor_bits: AtomicU32::new(0.0_f32.to_bits()),
            dropped_frames: AtomicU64::new(0),
            gaps_detected: AtomicU64::new(0),
            frames_processed: AtomicU64::new(0),
            audio_processed_ms: AtomicU64::new(0),
        }
    }
}

impl PipelineStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn audio_lag_ms(&self) -> i64 {
        self.audio_lag_ms.load(Ordering::Relaxed)
    }

    pub fn inference_time_ms(&self) -> u64 {
        self.inference_time_ms.load(Ordering::Relaxed)
    }

    pub fn real_time_factor(&self) -> f32 {
        f32::from_bits(self.real_time_factor_bits.load(Ordering::Relaxed))
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    pub fn gaps_detected(&self) -> u64 {
        self.gaps_detected.load(Ordering::Relaxed)
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed.load(Ordering::Relaxed)
    }

    pub fn audio_processed_ms(&self) -> u64 {
        self.audio_processed_ms.load(Ordering::Relaxed)
    }

    pub fn set_dropped_frames(&self, value: u64) {
        self.dropped_frames.store(value, Ordering::Relaxed);
    }

    pub fn set_gaps_detected(&self, value: u64) {
        self.gaps_detected.store(value, Ordering::Relaxed);
    }

    /// Update the real-time factor based on inference and audio durations.
    pub fn update_rtf(&self, inference_ms: u64, audio_ms: u64) {
        self.inference_time_ms.store(inference_ms, Ordering::Relaxed);
        if audio_ms > 0 {
            self.real_time_factor_bits.store(
                (inference_ms as f32 / audio_ms as f32).to_bits(),
                Ordering::Relaxed,
            );
        }
    }

    /// Update audio lag from a frame timestamp.
    pub fn update_lag(&self, frame_ts_ms: i64) {
        let now_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        self.audio_lag_ms.store(now_ms - frame_ts_ms, Ordering::Relaxed);
    }

    /// Increment the frames-processed counter.
    pub fn increment_frames_processed(&self) {
        self.frames_processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Add to the audio-processed duration.
    pub fn add_audio_processed_ms(&self, ms: u64) {
        self.audio_processed_ms.fetch_add(ms, Ordering::Relaxed);
    }

    /// Create a snapshot for serialization/display.
    pub fn snapshot(&self) -> PipelineStatusSnapshot {
        PipelineStatusSnapshot {
            audio_lag_ms: self.audio_lag_ms(),
            inference_time_ms: self.inference_time_ms(),
            real_time_factor: self.real_time_factor(),
            dropped_frames: self.dropped_frames(),
            gaps_detected: self.gaps_detected(),
            frames_processed: self.frames_processed(),
            audio_processed_ms: self.audio_processed_ms(),
        }
    }
}

/// Snapshot of pipeline status for serialization (e.g. into
/// `AgentEvent::MetricsCollected`).
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct PipelineStatusSnapshot {
    pub audio_lag_ms: i64,
    pub inference_time_ms: u64,
    pub real_time_factor: f32,
    pub dropped_frames: u64,
    pub gaps_detected: u64,
    pub frames_processed: u64,
    pub audio_processed_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_duration() {
        let samples: Vec<f32> = vec![0.0; 1600]; // 100ms at 16kHz
        let frame = AudioFrame::new(0, 0, 16000, samples);
        assert_eq!(frame.duration_ms(), 100);
    }

    #[test]
    fn bus_config_capacity() {
        let config = AudioBusConfig {
            capacity_ms: 1000,
            frame_size_ms: 50,
        };
        assert_eq!(config.channel_capacity(), 20);
    }

    #[tokio::test]
    async fn send_recv_roundtrip() {
        let mut bus = AudioBus::new();
        let sender = bus.sender();
        let mut receiver = bus.take_receiver().unwrap();

        let samples: Vec<f32> = vec![0.1; 800];
        sender.send(1000, 16000, samples);

        let frame = receiver.recv().await.unwrap();
        assert_eq!(frame.seq, 0);
        assert_eq!(frame.ts_ms, 1000);
        assert_eq!(frame.sample_rate, 16000);
        assert_eq!(frame.samples.len(), 800);
    }

    #[test]
    fn dropped_frames_counted_on_overflow() {
        let bus = AudioBus::with_config(AudioBusConfig {
            capacity_ms: 100,
            frame_size_ms: 50,
        });
        let sender = bus.sender();

        for _ in 0..10 {
            let samples: Vec<f32> = vec![0.0; 800];
            sender.send(0, 16000, samples);
        }

        assert!(sender.dropped_frames() > 0);
    }

    #[tokio::test]
    async fn sequence_monotonicity() {
        let mut bus = AudioBus::new();
        let sender = bus.sender();
        let mut receiver = bus.take_receiver().unwrap();

        for i in 0..10 {
            let samples: Vec<f32> = vec![0.1; 800];
            sender.send(i * 50, 16000, samples);
        }

        let mut last_seq = 0;
        for _ in 0..10 {
            let frame = receiver.recv().await.unwrap();
            assert!(frame.seq >= last_seq);
            last_seq = frame.seq;
        }
    }

    #[tokio::test]
    async fn zero_copy_arc_sharing() {
        let mut bus = AudioBus::new();
        let sender = bus.sender();
        let mut receiver = bus.take_receiver().unwrap();

        let samples: Vec<f32> = (0..800).map(|i| i as f32 / 800.0).collect();
        let original_arc: Arc<[f32]> = samples.clone().into();

        sender.send(0, 16000, original_arc.clone());

        let frame = receiver.recv().await.unwrap();
        assert_eq!(frame.samples.len(), 800);
        assert_eq!(frame.samples[0], 0.0);
        assert!((frame.samples[799] - 799.0 / 800.0).abs() < 0.0001);
    }

    #[test]
    fn drain_to_latest_skips_old() {
        let mut bus = AudioBus::new();
        let sender = bus.sender();
        let mut receiver = bus.take_receiver().unwrap();

        for i in 0..5 {
            let samples: Vec<f32> = vec![i as f32; 800];
            sender.send(i * 100, 16000, samples);
        }

        let latest = receiver.drain_to_latest().unwrap();
        assert_eq!(latest.ts_ms, 400);
        assert_eq!(latest.samples[0], 4.0);
    }
}
