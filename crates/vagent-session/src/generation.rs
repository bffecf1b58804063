//! The generation pipeline (§4.6): turns one [`crate::scheduler::SpeechHandle`]
//! into a completed assistant turn — call the LLM, stream sentence-tokenized
//! text into TTS, execute any tool calls the model emits (looping up to
//! `maxToolSteps`), and splice the result into the chat context.
//!
//! Grounded in the teacher's `StreamingTranscriber`
//! (`crates/application/src/streaming.rs`) for the "accumulate a stream,
//! commit stable chunks, let the tail roll forward" shape, turned around
//! here to drive TTS sentence-at-a-time from an LLM token stream instead of
//! committing STT words; and in `plugins/tools/src/executor.rs`'s
//! `ExecutionOutcome`/`emit_tool_*` pattern for the tool-call loop.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;

use vagent_chat::{ChatContext, ChatRole};
use vagent_events::{AgentEvent, EventBusRef};
use vagent_providers::llm::{ChatDelta, ChatRequest};
use vagent_providers::tts::TtsFrame;
use vagent_providers::{Llm, ProviderError, Tts};

use crate::agent::Agent;
use crate::scheduler::SpeechHandle;
use crate::tools::{ToolCtx, ToolError, ToolOutcome};

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("maximum tool steps ({0}) exceeded")]
    TooManyToolSteps(u32),
    /// Carries whatever was actually spoken before the handle was
    /// interrupted, so the caller can persist it as a truncated assistant
    /// turn (§7) instead of dropping it.
    #[error("generation cancelled")]
    Cancelled { spoken_text: String },
}

/// Where synthesized audio goes: the room's published track in
/// production, an in-memory collector in tests. Mirrors `Room`'s
/// `push_audio_frame` rather than depending on the whole `Room` trait.
#[async_trait]
pub trait AudioSink: Send + Sync {
    async fn push(&self, frame: TtsFrame);

    /// Drop whatever audio is queued for playback but not yet heard
    /// (§4.5/§7: interrupting a handle drains its output buffer to this
    /// callback).
    async fn clear_buffer(&self);
}

/// Split an accumulating text buffer into complete sentences plus a
/// held-back tail, so TTS only ever receives whole sentences (§4.6 step
/// 3's "sentence-at-a-time" streaming).
///
/// Grounded in the teacher's stability-tracked word commit: text already
/// terminated by `.`, `!`, `?`, or `\n` is "stable" and flushed; everything
/// after the last terminator is the rolling, uncommitted tail.
#[derive(Default)]
struct SentenceTokenizer {
    tail: String,
}

impl SentenceTokenizer {
    /// Feed new text, returning any newly complete sentences.
    fn push(&mut self, delta: &str) -> Vec<String> {
        self.tail.push_str(delta);
        let mut sentences = Vec::new();

        loop {
            let Some(boundary) = self.tail.find(['.', '!', '?', '\n']) else {
                break;
            };
            let split_at = boundary + 1;
            let sentence: String = self.tail.drain(..split_at).collect();
            let trimmed = sentence.trim();
            if !trimmed.is_empty() {
                sentences.push(trimmed.to_string());
            }
        }

        sentences
    }

    /// Flush whatever is left in the tail once the stream ends.
    fn finish(mut self) -> Option<String> {
        let trimmed = self.tail.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.tail).trim().to_string())
        }
    }
}

/// Result of running the pipeline once: the assistant text actually
/// spoken (for §7's interruption truncation) and whether a handoff
/// occurred.
pub struct GenerationOutcome {
    pub spoken_text: String,
    pub handoff: Option<Arc<Agent>>,
}

pub struct GenerationPipeline<'a> {
    pub llm: &'a dyn Llm,
    pub tts: &'a dyn Tts,
    pub sink: &'a dyn AudioSink,
    pub events: &'a EventBusRef,
    pub max_tool_steps: u32,
}

impl<'a> GenerationPipeline<'a> {
    /// Speak fixed text verbatim (§4.5 `session.say()`): no LLM call, no
    /// tool loop, just sentence-tokenized TTS playout.
    pub async fn say(&self, handle: &SpeechHandle, text: &str) -> Result<GenerationOutcome, GenerationError> {
        if handle.is_interrupted() {
            self.sink.clear_buffer().await;
            return Err(GenerationError::Cancelled { spoken_text: String::new() });
        }

        let mut tokenizer = SentenceTokenizer::default();
        let mut spoken_text = String::new();
        for sentence in tokenizer.push(text) {
            self.tts.push_text(&handle.id, &sentence)?;
            spoken_text.push_str(&sentence);
            spoken_text.push(' ');
        }
        if let Some(tail) = tokenizer.finish() {
            self.tts.push_text(&handle.id, &tail)?;
            spoken_text.push_str(&tail);
        }
        self.tts.flush(&handle.id)?;

        let mut frames = self.tts.stream()?;
        loop {
            tokio::select! {
                biased;
                _ = handle.cancellation_token().cancelled() => {
                    self.sink.clear_buffer().await;
                    return Err(GenerationError::Cancelled { spoken_text });
                }
                frame = frames.next() => {
                    let Some(frame) = frame else { break };
                    self.sink.push(frame?).await;
                }
            }
        }

        Ok(GenerationOutcome { spoken_text, handoff: None })
    }

    /// Run the full pipeline for one speech handle against the given
    /// agent and chat context (§4.6 steps 1-8).
    pub async fn run(
        &self,
        handle: &SpeechHandle,
        agent: &Agent,
        chat_ctx: &mut ChatContext,
    ) -> Result<GenerationOutcome, GenerationError> {
        let mut steps_taken = 0u32;
        let mut spoken_text = String::new();

        loop {
            if handle.is_interrupted() {
                self.sink.clear_buffer().await;
                return Err(GenerationError::Cancelled { spoken_text });
            }

            let request = ChatRequest {
                context: chat_ctx.clone(),
                tools: agent.tools().specs(),
                temperature: None,
            };

            let (text, tool_calls) = match self.stream_once(handle, request, &mut spoken_text).await {
                Ok(v) => v,
                Err(GenerationError::Cancelled { .. }) => return Err(GenerationError::Cancelled { spoken_text }),
                Err(err) => return Err(err),
            };

            if !text.is_empty() {
                chat_ctx.append_assistant(&text);
            }

            if tool_calls.is_empty() {
                return Ok(GenerationOutcome { spoken_text, handoff: None });
            }

            steps_taken += 1;
            if steps_taken > self.max_tool_steps {
                return Err(GenerationError::TooManyToolSteps(self.max_tool_steps));
            }

            let mut handoff = None;
            for (call_id, name, arguments) in tool_calls {
                chat_ctx.append_tool_call(&name, arguments.clone());

                let Some(tool) = agent.tools().get(&name) else {
                    chat_ctx.append_tool_output(&call_id, format!("unknown tool: {name}"), true);
                    continue;
                };

                let ctx = ToolCtx::new(call_id.clone(), handle.cancellation_token());
                match tool.execute(arguments, &ctx).await {
                    Ok(ToolOutcome::Text(result)) => {
                        chat_ctx.append_tool_output(&call_id, result, false);
                    }
                    Ok(ToolOutcome::Handoff { agent: next, returns }) => {
                        chat_ctx.append_tool_output(&call_id, returns.unwrap_or_default(), false);
                        handoff = Some(next);
                    }
                    Err(ToolError::Tool(msg)) => {
                        chat_ctx.append_tool_output(&call_id, msg, true);
                    }
                    Err(ToolError::Other(msg)) => {
                        self.events.emit(AgentEvent::ErrorEvent { source: name.clone(), error: msg });
                        chat_ctx.append_tool_output(&call_id, "tool execution failed", true);
                    }
                }
            }

            if let Some(agent) = handoff {
                return Ok(GenerationOutcome { spoken_text, handoff: Some(agent) });
            }
        }
    }

    /// Stream one LLM response, splitting text into TTS-ready sentences
    /// as it arrives and collecting any tool calls emitted alongside it.
    async fn stream_once(
        &self,
        handle: &SpeechHandle,
        request: ChatRequest,
        spoken_text: &mut String,
    ) -> Result<(String, Vec<(String, String, serde_json::Value)>), GenerationError> {
        let mut stream = self.llm.chat(request).await?;
        let mut tokenizer = SentenceTokenizer::default();
        let mut full_text = String::new();
        let mut tool_calls = Vec::new();

        loop {
            tokio::select! {
                biased;
                _ = handle.cancellation_token().cancelled() => {
                    self.sink.clear_buffer().await;
                    return Err(GenerationError::Cancelled { spoken_text: String::new() });
                }
                chunk = stream.next() => {
                    let Some(chunk) = chunk else { break };
                    match chunk?.delta {
                        ChatDelta::Text(delta) => {
                            full_text.push_str(&delta);
                            for sentence in tokenizer.push(&delta) {
                                self.tts.push_text(&handle.id, &sentence)?;
                                spoken_text.push_str(&sentence);
                                spoken_text.push(' ');
                            }
                        }
                        ChatDelta::ToolCall { name, arguments } => {
                            tool_calls.push((format!("{}-{}", handle.id, tool_calls.len()), name, arguments));
                        }
                    }
                }
            }
        }

        if let Some(tail) = tokenizer.finish() {
            self.tts.push_text(&handle.id, &tail)?;
            spoken_text.push_str(&tail);
        }
        self.tts.flush(&handle.id)?;

        let mut frames = self.tts.stream()?;
        while let Some(frame) = frames.next().await {
            self.sink.push(frame?).await;
        }

        Ok((full_text, tool_calls))
    }
}

/// The role a chat item must have to be counted as "spoken" by the
/// assistant, used when truncating an interrupted reply (§7).
pub fn is_assistant_text(role: ChatRole) -> bool {
    role == ChatRole::Assistant
}
