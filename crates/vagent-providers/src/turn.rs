//! End-of-turn prediction, grounded in the teacher's `TurnDetector` trait
//! (`crates/turn/src/lib.rs`), generalized from raw-audio endpoint
//! probability to the spec's chat-context-conditioned prediction (§4.4
//! step 6: EOU scheduling consults the running chat context, not just the
//! trailing audio).

use async_trait::async_trait;
use vagent_chat::ChatContext;

use crate::Result;

#[async_trait]
pub trait TurnDetector: Send + Sync {
    fn name(&self) -> &'static str;

    fn supports_language(&self, lang: Option<&str>) -> bool {
        lang.is_none() || lang == Some("en")
    }

    /// Per-language threshold above which the turn is considered complete,
    /// if the implementation has a fixed one; `None` defers to the
    /// session's own default.
    fn unlikely_threshold(&self, lang: Option<&str>) -> Option<f32>;

    /// Probability in `[0.0, 1.0]` that the user has finished their turn,
    /// given the chat context so far.
    async fn predict_end_of_turn(&self, chat_ctx: &ChatContext) -> Result<f32>;
}

#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use super::*;

    pub struct FixedTurnDetector {
        pub probability: f32,
    }

    #[async_trait]
    impl TurnDetector for FixedTurnDetector {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn unlikely_threshold(&self, _lang: Option<&str>) -> Option<f32> {
            Some(0.5)
        }

        async fn predict_end_of_turn(&self, _chat_ctx: &ChatContext) -> Result<f32> {
            Ok(self.probability)
        }
    }

    #[cfg(test)]
    #[tokio::test]
    async fn fixed_detector_returns_configured_probability() {
        let detector = FixedTurnDetector { probability: 0.9 };
        let ctx = ChatContext::new();
        let p = detector.predict_end_of_turn(&ctx).await.unwrap();
        assert_eq!(p, 0.9);
        assert!(p >= detector.unlikely_threshold(None).unwrap());
    }
}
