//! Append-only chat context with identity-preserving diffing.
//!
//! Mirrors the `ContextState` RwLock-guarded state-struct idiom from the
//! teacher's system-context crate, but `ChatContext` itself is owned
//! exclusively by the session task (per the data model's ownership rules)
//! and carries no internal locking — callers that need shared access wrap
//! it themselves.

mod diff;

pub use diff::{diff, ChatContextDiff};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role of a chat item, per the data model's `ChatContext` entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    ToolCall,
    ToolOutput,
}

/// Type-specific payload for a chat item.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatContent {
    /// Plain text (system/user/assistant messages).
    Text(String),
    /// An LLM-emitted function call awaiting execution.
    ToolCall {
        name: String,
        arguments: serde_json::Value,
    },
    /// The result of executing a tool call.
    ToolOutput {
        call_id: String,
        output: String,
        is_error: bool,
    },
}

impl ChatContent {
    /// Best-effort plain-text rendering, used when truncating an
    /// interrupted assistant utterance (§4.6 step 8, §7).
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ChatContent::Text(text) => Some(text),
            _ => None,
        }
    }
}

/// One item in a `ChatContext`. Ids are stable identity, never reused.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatItem {
    pub id: String,
    pub role: ChatRole,
    pub content: ChatContent,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl ChatItem {
    fn new(role: ChatRole, content: ChatContent) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content,
            created_at: chrono::Utc::now(),
        }
    }
}

/// Ordered, append-only conversation history.
///
/// Ordering defines the conversation; item ids are stable across mutation
/// so providers that maintain server-side state can incrementally apply a
/// [`ChatContextDiff`] rather than resending the whole context.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatContext {
    items: Vec<ChatItem>,
}

impl ChatContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> &[ChatItem] {
        &self.items
    }

    pub fn ids(&self) -> Vec<String> {
        self.items.iter().map(|item| item.id.clone()).collect()
    }

    pub fn get(&self, id: &str) -> Option<&ChatItem> {
        self.items.iter().find(|item| item.id == id)
    }

    fn push(&mut self, item: ChatItem) -> &ChatItem {
        self.items.push(item);
        self.items.last().unwrap()
    }

    pub fn append_system(&mut self, text: impl Into<String>) -> &ChatItem {
        self.push(ChatItem::new(ChatRole::System, ChatContent::Text(text.into())))
    }

    pub fn append_user(&mut self, text: impl Into<String>) -> &ChatItem {
        self.push(ChatItem::new(ChatRole::User, ChatContent::Text(text.into())))
    }

    pub fn append_assistant(&mut self, text: impl Into<String>) -> &ChatItem {
        self.push(ChatItem::new(
            ChatRole::Assistant,
            ChatContent::Text(text.into()),
        ))
    }

    pub fn append_tool_call(
        &mut self,
        name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> &ChatItem {
        self.push(ChatItem::new(
            ChatRole::ToolCall,
            ChatContent::ToolCall {
                name: name.into(),
                arguments,
            },
        ))
    }

    pub fn append_tool_output(
        &mut self,
        call_id: impl Into<String>,
        output: impl Into<String>,
        is_error: bool,
    ) -> &ChatItem {
        self.push(ChatItem::new(
            ChatRole::ToolOutput,
            ChatContent::ToolOutput {
                call_id: call_id.into(),
                output: output.into(),
                is_error,
            },
        ))
    }

    /// Drop every item after `id` (exclusive). Used when the host replaces
    /// the chat context outright.
    pub fn truncate_after(&mut self, id: &str) {
        if let Some(pos) = self.items.iter().position(|item| item.id == id) {
            self.items.truncate(pos + 1);
        }
    }

    /// Replace the text of an assistant item in place, preserving its id
    /// and position. Used to truncate an interrupted reply to its spoken
    /// prefix (§7's user-visible interruption semantics).
    pub fn set_text(&mut self, id: &str, text: impl Into<String>) {
        if let Some(item) = self.items.iter_mut().find(|item| item.id == id) {
            item.content = ChatContent::Text(text.into());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}
