//! Chat-completion capability (spec §6.2, data model "ChatContext").
//!
//! The teacher's workspace has no LLM client of its own; the request/chunk
//! shape here follows the sibling example's `ChatMessage`/`Usage` split
//! (`querymt`'s `chat::mod` and `completion::mod`), adapted to the spec's
//! turn-based streaming contract and narrowed to what the session actually
//! consumes (no multi-modal message types, no tool-schema generation —
//! those stay with the concrete provider).

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use vagent_chat::ChatContext;

use crate::Result;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// One incremental piece of an assistant turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ChatDelta {
    Text(String),
    ToolCall { name: String, arguments: serde_json::Value },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatChunk {
    pub id: String,
    pub delta: ChatDelta,
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub context: ChatContext,
    pub tools: Vec<ToolSpec>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

pub type ChatStream = BoxStream<'static, Result<ChatChunk>>;

#[async_trait]
pub trait Llm: Send + Sync {
    async fn chat(&self, req: ChatRequest) -> Result<ChatStream>;

    fn model_name(&self) -> &str;
}

#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use super::*;
    use futures::stream;

    pub struct FakeLlm {
        chunks: Vec<ChatChunk>,
    }

    impl FakeLlm {
        pub fn new(chunks: Vec<ChatChunk>) -> Self {
            Self { chunks }
        }
    }

    #[async_trait]
    impl Llm for FakeLlm {
        async fn chat(&self, _req: ChatRequest) -> Result<ChatStream> {
            let chunks = self.chunks.clone().into_iter().map(Ok);
            Ok(Box::pin(stream::iter(chunks)))
        }

        fn model_name(&self) -> &str {
            "fake-llm"
        }
    }

    #[cfg(test)]
    #[tokio::test]
    async fn fake_llm_streams_configured_chunks() {
        use futures::StreamExt;

        let fake = FakeLlm::new(vec![
            ChatChunk { id: "1".into(), delta: ChatDelta::Text("Hel".into()), usage: None },
            ChatChunk {
                id: "1".into(),
                delta: ChatDelta::Text("lo".into()),
                usage: Some(Usage { prompt_tokens: 10, completion_tokens: 2, total_tokens: 12 }),
            },
        ]);

        let req = ChatRequest { context: ChatContext::new(), tools: vec![], temperature: None };
        let mut stream = fake.chat(req).await.unwrap();
        let mut text = String::new();
        while let Some(chunk) = stream.next().await {
            if let ChatDelta::Text(t) = chunk.unwrap().delta {
                text.push_str(&t);
            }
        }
        assert_eq!(text, "Hello");
    }
}
