//! Text-to-speech capability (spec §6.2), mirroring `Stt`'s shape in
//! reverse: one-shot `synthesize` plus a push-driven `stream` for
//! sentence-at-a-time generation during speech playback (§4.6).

use async_trait::async_trait;
use futures::stream::BoxStream;
use vagent_bus::AudioFrame;

use crate::Result;

#[derive(Debug, Clone)]
pub struct TtsFrame {
    pub request_id: String,
    pub segment_id: u32,
    pub frame: AudioFrame,
    pub is_final: bool,
}

pub type SynthesizeStream = BoxStream<'static, Result<TtsFrame>>;

#[async_trait]
pub trait Tts: Send + Sync {
    /// Synthesize a complete utterance, buffering the whole result.
    async fn synthesize(&self, text: &str, request_id: &str) -> Result<Vec<TtsFrame>>;

    /// Open a streaming synthesis session fed incrementally via `push_text`.
    fn stream(&self) -> Result<SynthesizeStream>;

    fn push_text(&self, request_id: &str, text_delta: &str) -> Result<()>;

    fn flush(&self, request_id: &str) -> Result<()>;

    fn sample_rate(&self) -> u32;
}

#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use super::*;
    use futures::stream;
    use std::sync::Arc;

    pub struct FakeTts {
        sample_rate: u32,
    }

    impl FakeTts {
        pub fn new(sample_rate: u32) -> Self {
            Self { sample_rate }
        }
    }

    #[async_trait]
    impl Tts for FakeTts {
        async fn synthesize(&self, text: &str, request_id: &str) -> Result<Vec<TtsFrame>> {
            Ok(vec![TtsFrame {
                request_id: request_id.to_string(),
                segment_id: 0,
                frame: AudioFrame {
                    seq: 0,
                    ts_ms: 0,
                    sample_rate: self.sample_rate,
                    samples: Arc::from(vec![0.0f32; text.len()]),
                },
                is_final: true,
            }])
        }

        fn stream(&self) -> Result<SynthesizeStream> {
            Ok(Box::pin(stream::empty()))
        }

        fn push_text(&self, _request_id: &str, _text_delta: &str) -> Result<()> {
            Ok(())
        }

        fn flush(&self, _request_id: &str) -> Result<()> {
            Ok(())
        }

        fn sample_rate(&self) -> u32 {
            self.sample_rate
        }
    }

    #[cfg(test)]
    #[tokio::test]
    async fn fake_tts_synthesizes_final_frame() {
        let fake = FakeTts::new(16_000);
        let frames = fake.synthesize("hi", "req-1").await.unwrap();
        assert_eq!(frames.len(), 1);
        assert!(frames[0].is_final);
        assert_eq!(frames[0].request_id, "req-1");
    }
}
