//! The tool executor (spec §4.6 step 7): LLM-emitted function calls are
//! dispatched to a registered [`Tool`], whose result is either appended
//! back to the chat context (looping the generation pipeline up to
//! `maxToolSteps`) or a [`ToolOutcome::Handoff`] that swaps the session's
//! current [`crate::Agent`].
//!
//! Grounded in the teacher's `Tool` trait (`plugins/tools/src/tools/mod.rs`):
//! dyn-compatible via `async_trait`, structured `ToolResult`/`ToolError`
//! rather than a bare `Result<String, String>`. Reused directly rather than
//! reinvented, since its shape already matches §4.6 step 7 exactly.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::Agent;

/// Context handed to a tool at execution time (spec §4.6 step 7:
/// `(args, {ctx, toolCallId, abortSignal})`).
pub struct ToolCtx {
    pub tool_call_id: String,
    pub cancel: CancellationToken,
}

impl ToolCtx {
    pub fn new(tool_call_id: impl Into<String>, cancel: CancellationToken) -> Self {
        Self { tool_call_id: tool_call_id.into(), cancel }
    }
}

/// Outcome of a tool call, per spec §4.6 step 7's two result shapes.
pub enum ToolOutcome {
    /// A scalar/string result, appended as a tool-output chat item; the
    /// generation pipeline loops back to build a fresh LLM request.
    Text(String),
    /// Hand conversation control to a different agent (§4.6 step 7,
    /// glossary "Handoff"). `returns` is the text recorded as this tool
    /// call's output, spoken or not depending on the new agent.
    Handoff { agent: Arc<Agent>, returns: Option<String> },
}

/// Error raised by a tool. `Tool(msg)` is the expected, recoverable kind
/// (spec §7: "`ToolError(\"msg\")` surfaces as the tool's output string");
/// `Other` stands in for any other thrown error, which the session logs
/// and surfaces as an `ErrorEvent`, replacing the tool's output with the
/// fixed string `"tool execution failed"`.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("{0}")]
    Tool(String),
    #[error("{0}")]
    Other(String),
}

impl ToolError {
    pub fn tool(msg: impl Into<String>) -> Self {
        ToolError::Tool(msg.into())
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// JSON schema for the tool's arguments, used to build the LLM's
    /// `ToolSpec` (spec §4.6 step 1: "Build the tool schema for the
    /// current agent").
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, args: serde_json::Value, ctx: &ToolCtx) -> Result<ToolOutcome, ToolError>;
}

/// Tools keyed by name, unique within an agent (data model `Agent`
/// invariant).
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any prior tool of the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> &mut Self {
        self.tools.insert(tool.name().to_string(), tool);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Build the LLM-facing tool schema for the current agent (spec §4.6
    /// step 1).
    pub fn specs(&self) -> Vec<vagent_providers::llm::ToolSpec> {
        self.tools
            .values()
            .map(|tool| vagent_providers::llm::ToolSpec {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters_schema(),
            })
            .collect()
    }
}
