//! Media-transport capability (spec §6.2, "Room"). The core only ever
//! depends on this trait — never a concrete transport SDK (spec §1
//! non-goal). Shaped after the teacher's event-stream conventions
//! (`InMemoryEventBus`-style fakes for testing) rather than any specific
//! transport's API, since the teacher has no networked transport of its
//! own to generalize from.

use async_trait::async_trait;
use futures::stream::BoxStream;
use vagent_bus::AudioFrame;

#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    #[error("not connected")]
    NotConnected,
    #[error("connect failed: {0}")]
    ConnectFailed(String),
    #[error("publish failed: {0}")]
    PublishFailed(String),
}

pub type Result<T> = std::result::Result<T, RoomError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub identity: String,
    pub is_local: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackPublication {
    pub track_sid: String,
    pub participant_identity: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomEvent {
    ParticipantConnected(Participant),
    ParticipantDisconnected(Participant),
    TrackSubscribed(TrackPublication),
    TrackUnsubscribed(TrackPublication),
    Disconnected { reason: String },
}

pub type RoomEventStream = BoxStream<'static, RoomEvent>;
pub type MicrophoneStream = BoxStream<'static, AudioFrame>;

/// External media transport contract: connect to a room, publish the
/// agent's synthesized audio, and subscribe to a participant's microphone.
#[async_trait]
pub trait Room: Send + Sync {
    async fn connect(&self, url: &str, token: &str) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    /// Publish a track the agent will push synthesized audio frames to.
    async fn publish_audio_track(&self, name: &str) -> Result<TrackPublication>;

    async fn push_audio_frame(&self, track: &TrackPublication, frame: AudioFrame) -> Result<()>;

    /// Subscribe to a participant's microphone as a stream of audio frames.
    fn subscribe_microphone(&self, participant_identity: &str) -> Result<MicrophoneStream>;

    fn events(&self) -> RoomEventStream;

    fn local_participant(&self) -> Participant;
}

#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use super::*;
    use futures::stream;
    use std::sync::Mutex;

    /// An in-memory room fake, mirroring the teacher's `InMemoryEventBus`
    /// test-double idiom: records what was published, replays canned
    /// microphone frames and events.
    pub struct InMemoryRoom {
        local: Participant,
        mic_frames: Vec<AudioFrame>,
        events: Vec<RoomEvent>,
        published: Mutex<Vec<(String, AudioFrame)>>,
    }

    impl InMemoryRoom {
        pub fn new(local_identity: &str) -> Self {
            Self {
                local: Participant { identity: local_identity.to_string(), is_local: true },
                mic_frames: Vec::new(),
                events: Vec::new(),
                published: Mutex::new(Vec::new()),
            }
        }

        pub fn with_microphone_frames(mut self, frames: Vec<AudioFrame>) -> Self {
            self.mic_frames = frames;
            self
        }

        pub fn with_events(mut self, events: Vec<RoomEvent>) -> Self {
            self.events = events;
            self
        }

        pub fn published_frames(&self) -> Vec<(String, AudioFrame)> {
            self.published.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Room for InMemoryRoom {
        async fn connect(&self, _url: &str, _token: &str) -> Result<()> {
            Ok(())
        }

        async fn disconnect(&self) -> Result<()> {
            Ok(())
        }

        async fn publish_audio_track(&self, name: &str) -> Result<TrackPublication> {
            Ok(TrackPublication {
                track_sid: format!("track-{name}"),
                participant_identity: self.local.identity.clone(),
            })
        }

        async fn push_audio_frame(&self, track: &TrackPublication, frame: AudioFrame) -> Result<()> {
            self.published.lock().unwrap().push((track.track_sid.clone(), frame));
            Ok(())
        }

        fn subscribe_microphone(&self, _participant_identity: &str) -> Result<MicrophoneStream> {
            Ok(Box::pin(stream::iter(self.mic_frames.clone())))
        }

        fn events(&self) -> RoomEventStream {
            Box::pin(stream::iter(self.events.clone()))
        }

        fn local_participant(&self) -> Participant {
            self.local.clone()
        }
    }

    #[tokio::test]
    async fn in_memory_room_records_published_frames() {
        let room = InMemoryRoom::new("agent");
        let track = room.publish_audio_track("mic-out").await.unwrap();
        let frame = AudioFrame { seq: 1, ts_ms: 0, sample_rate: 16_000, samples: std::sync::Arc::from(vec![0.0f32; 10]) };
        room.push_audio_frame(&track, frame).await.unwrap();
        assert_eq!(room.published_frames().len(), 1);
    }

    #[tokio::test]
    async fn in_memory_room_replays_microphone_frames() {
        use futures::StreamExt;

        let frame = AudioFrame { seq: 1, ts_ms: 0, sample_rate: 16_000, samples: std::sync::Arc::from(vec![0.0f32; 4]) };
        let room = InMemoryRoom::new("agent").with_microphone_frames(vec![frame]);
        let mut mic = room.subscribe_microphone("caller").unwrap();
        assert!(mic.next().await.is_some());
        assert!(mic.next().await.is_none());
    }
}
