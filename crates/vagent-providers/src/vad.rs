//! Voice-activity-detection capability, grounded in the teacher's
//! `VoiceActivityDetector` trait and `VadEvent` enum (`crates/vad/src/lib.rs`),
//! generalized from a synchronous `detect()` call to a push/stream shape so
//! the session can feed it from a live `vagent_bus::AudioBusReceiver`.

use async_trait::async_trait;
use futures::stream::BoxStream;
use vagent_bus::AudioFrame;

use crate::Result;

#[derive(Debug, Clone, PartialEq)]
pub enum VadEvent {
    SpeechStart { timestamp_ms: u64 },
    SpeechEnd { start_ms: u64, end_ms: u64 },
}

pub type VadStream = BoxStream<'static, Result<VadEvent>>;

/// Handle to an audio source a `Vad` implementation should read from.
/// Kept as a trait object so `vagent-session` can swap in a bus receiver or
/// a test fixture without the provider crate depending on either.
pub trait AudioStreamHandle: Send + Sync {
    fn try_recv(&self) -> Option<AudioFrame>;
}

#[async_trait]
pub trait Vad: Send + Sync {
    /// Start (or restart) detection, yielding speech start/end transitions.
    fn stream(&self) -> Result<VadStream>;

    /// Attach the audio source this VAD instance should run on.
    fn update_input(&self, audio: std::sync::Arc<dyn AudioStreamHandle>);
}

#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use super::*;
    use futures::stream;

    pub struct FakeVad {
        events: Vec<VadEvent>,
    }

    impl FakeVad {
        pub fn new(events: Vec<VadEvent>) -> Self {
            Self { events }
        }
    }

    #[async_trait]
    impl Vad for FakeVad {
        fn stream(&self) -> Result<VadStream> {
            let events = self.events.clone().into_iter().map(Ok);
            Ok(Box::pin(stream::iter(events)))
        }

        fn update_input(&self, _audio: std::sync::Arc<dyn AudioStreamHandle>) {}
    }

    #[cfg(test)]
    #[tokio::test]
    async fn fake_vad_emits_start_then_end() {
        use futures::StreamExt;

        let fake = FakeVad::new(vec![
            VadEvent::SpeechStart { timestamp_ms: 0 },
            VadEvent::SpeechEnd { start_ms: 0, end_ms: 800 },
        ]);
        let mut stream = fake.stream().unwrap();
        let first = stream.next().await.unwrap().unwrap();
        let second = stream.next().await.unwrap().unwrap();
        assert!(matches!(first, VadEvent::SpeechStart { .. }));
        assert!(matches!(second, VadEvent::SpeechEnd { .. }));
    }
}
