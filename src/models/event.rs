//! Consumer-facing event types produced by the stream parser.
//!
//! [`NormalizedEvent`] is the only shape downstream consumers (chat
//! persistence, live broadcast) see. The agent's raw protocol lines are
//! decoded in [`crate::stream::protocol`] and never leave the parser.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One structured unit of an assistant turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain assistant text.
    Text {
        /// Complete text of the block.
        text: String,
    },
    /// A tool invocation requested by the agent.
    ToolUse {
        /// Tool-use identifier, referenced by the matching result.
        id: String,
        /// Tool name.
        name: String,
        /// Parsed tool input.
        #[serde(default)]
        input: Value,
    },
    /// Output of a previously requested tool invocation.
    ToolResult {
        /// Identifier of the tool use this result answers.
        tool_use_id: String,
        /// Raw result content: a string or an array of content parts.
        #[serde(default)]
        content: Value,
        /// Whether the tool reported failure.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
    /// Extended thinking text.
    Thinking {
        /// Thinking text.
        #[serde(default)]
        thinking: String,
    },
    /// Any block kind this crate does not model.
    #[serde(other)]
    Other,
}

/// Normalized event delivered to the caller of a send operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NormalizedEvent {
    /// The agent process finished initialising.
    Init {
        /// Session identifier reported by the agent.
        session_id: Option<String>,
        /// Model serving the session.
        model: Option<String>,
        /// Tools available to the agent.
        tools: Vec<String>,
        /// Working directory reported by the agent.
        cwd: Option<String>,
    },
    /// Incremental assistant text.
    Delta {
        /// Text fragment, exactly as streamed.
        text: String,
    },
    /// A tool invocation whose input has been fully received.
    ToolUseStart {
        /// Tool-use identifier.
        id: String,
        /// Tool name.
        name: String,
        /// Parsed tool input object.
        input: Value,
    },
    /// A tool result.
    ToolResult {
        /// Identifier of the tool use this result answers.
        tool_use_id: String,
        /// Result content flattened to text.
        content: String,
        /// Whether the tool reported failure.
        is_error: bool,
    },
    /// The canonical, fully formed assistant message for the turn.
    AssistantComplete {
        /// Complete content blocks.
        content: Vec<ContentBlock>,
    },
    /// End of turn.
    Result {
        /// Whether the turn succeeded.
        success: bool,
        /// Result subtype as reported by the agent (`success`, `error_max_turns`, ...).
        subtype: Option<String>,
        /// Final result text.
        result: Option<String>,
        /// Error description for failed turns.
        error: Option<String>,
        /// Total cost in USD.
        cost_usd: Option<f64>,
        /// Wall-clock duration in milliseconds.
        duration_ms: Option<u64>,
        /// Number of agent turns.
        num_turns: Option<u32>,
        /// Session the result belongs to.
        session_id: Option<String>,
    },
    /// Free-text diagnostic; never terminates the stream by itself.
    Error {
        /// Human-readable message.
        message: String,
    },
}

impl NormalizedEvent {
    /// Build an [`NormalizedEvent::Error`] from any displayable message.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Whether this event closes the turn.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Result { .. })
    }
}

/// Flatten tool-result content to a single string.
///
/// Strings pass through, arrays of `{"type":"text","text":…}` parts (or bare
/// strings) are joined with `\n`, `null` becomes empty and anything else is
/// rendered as JSON.
#[must_use]
pub fn flatten_tool_result(content: &Value) -> String {
    match content {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|part| match part {
                Value::String(text) => Some(text.clone()),
                Value::Object(map) => map.get("text").and_then(Value::as_str).map(str::to_owned),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    }
}
