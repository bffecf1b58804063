//! Speech-to-text capability (spec §6.2, data model `SpeechEvent`).

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::Result;

/// A single recognized word with timing, mirroring the teacher's
/// `stt::engine::Word`.
#[derive(Debug, Clone, PartialEq)]
pub struct Word {
    pub text: String,
    pub start_ms: u64,
    pub end_ms: u64,
    pub confidence: f32,
}

/// A transcribed segment (interim or final), mirroring the teacher's
/// `stt::engine::Segment`.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub text: String,
    pub start_ms: u64,
    pub end_ms: u64,
    pub words: Vec<Word>,
}

/// One STT recognition result, carrying all n-best alternatives.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechEvent {
    pub alternatives: Vec<Segment>,
    pub is_final: bool,
    pub language: Option<String>,
}

impl SpeechEvent {
    pub fn text(&self) -> &str {
        self.alternatives.first().map(|s| s.text.as_str()).unwrap_or("")
    }
}

/// Events yielded by a streaming STT session.
#[derive(Debug, Clone, PartialEq)]
pub enum SttStreamEvent {
    StartOfSpeech,
    Interim(SpeechEvent),
    Final(SpeechEvent),
    EndOfSpeech,
}

pub type SttStream = BoxStream<'static, Result<SttStreamEvent>>;

/// Speech-to-text capability. Implementations wrap a concrete provider SDK;
/// the core never depends on one directly (spec §1 non-goal).
#[async_trait]
pub trait Stt: Send + Sync {
    /// One-shot recognition over a complete audio buffer.
    async fn recognize(&self, audio: &[f32], lang: Option<&str>) -> Result<SpeechEvent>;

    /// Open a streaming recognition session. The returned stream owns its
    /// audio input; callers feed it through whatever channel the
    /// implementation exposes (e.g. a `vagent_bus::AudioBusReceiver`).
    fn stream(&self) -> Result<SttStream>;

    fn model_name(&self) -> &str;

    fn supported_languages(&self) -> Vec<&'static str> {
        vec!["en"]
    }
}

#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use super::*;
    use futures::stream;

    /// A canned STT provider for session tests: replays a fixed sequence
    /// of stream events, never does real inference.
    pub struct FakeStt {
        events: Vec<SttStreamEvent>,
    }

    impl FakeStt {
        pub fn new(events: Vec<SttStreamEvent>) -> Self {
            Self { events }
        }
    }

    #[async_trait]
    impl Stt for FakeStt {
        async fn recognize(&self, _audio: &[f32], _lang: Option<&str>) -> Result<SpeechEvent> {
            Ok(SpeechEvent {
                alternatives: vec![Segment {
                    text: "fake transcript".to_string(),
                    start_ms: 0,
                    end_ms: 0,
                    words: vec![],
                }],
                is_final: true,
                language: None,
            })
        }

        fn stream(&self) -> Result<SttStream> {
            let events = self.events.clone().into_iter().map(Ok);
            Ok(Box::pin(stream::iter(events)))
        }

        fn model_name(&self) -> &str {
            "fake-stt"
        }
    }

    #[cfg(test)]
    #[tokio::test]
    async fn fake_stt_replays_configured_events() {
        use futures::StreamExt;

        let fake = FakeStt::new(vec![
            SttStreamEvent::StartOfSpeech,
            SttStreamEvent::Final(SpeechEvent {
                alternatives: vec![Segment {
                    text: "hello".into(),
                    start_ms: 0,
                    end_ms: 500,
                    words: vec![],
                }],
                is_final: true,
                language: Some("en".into()),
            }),
            SttStreamEvent::EndOfSpeech,
        ]);

        let mut stream = fake.stream().unwrap();
        let mut seen = Vec::new();
        while let Some(event) = stream.next().await {
            seen.push(event.unwrap());
        }
        assert_eq!(seen.len(), 3);
        assert!(matches!(seen[0], SttStreamEvent::StartOfSpeech));
        assert!(matches!(seen[2], SttStreamEvent::EndOfSpeech));
    }
}
