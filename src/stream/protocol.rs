//! Wire types for the agent's line-delimited JSON output.
//!
//! Each stdout line is one JSON object discriminated by its `type` field.
//! Partial-message events (`content_block_*`) arrive either bare or wrapped
//! in a `stream_event` envelope; both decode to the same
//! [`RawProtocolEvent`].
//!
//! | `type`                   | Maps to                                       |
//! |--------------------------|-----------------------------------------------|
//! | `system` + `init`        | [`RawProtocolEvent::SystemInit`]              |
//! | `content_block_start`    | [`RawProtocolEvent::ContentBlockStart`]       |
//! | `content_block_delta`    | [`RawProtocolEvent::ContentBlockDelta`]       |
//! | `content_block_stop`     | [`RawProtocolEvent::ContentBlockStop`]        |
//! | `assistant`              | [`RawProtocolEvent::AssistantMessage`]        |
//! | `user`                   | [`RawProtocolEvent::UserMessage`]             |
//! | `result`                 | [`RawProtocolEvent::Result`]                  |
//! | `stream_event`           | the wrapped event, decoded as above           |
//! | *(any other)*            | skipped; logged at `DEBUG`                    |

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::models::event::ContentBlock;
use crate::{AppError, Result};

/// Discriminator shared by every line.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    subtype: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InitLine {
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    tools: Vec<String>,
    #[serde(default)]
    cwd: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamEventLine {
    event: Value,
}

#[derive(Debug, Deserialize)]
struct BlockStartLine {
    index: usize,
    content_block: ContentBlock,
}

#[derive(Debug, Deserialize)]
struct BlockDeltaLine {
    index: usize,
    delta: BlockDelta,
}

#[derive(Debug, Deserialize)]
struct BlockStopLine {
    index: usize,
}

#[derive(Debug, Deserialize)]
struct MessageLine {
    message: MessageBody,
}

#[derive(Debug, Deserialize)]
struct MessageBody {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

/// Incremental payload of a `content_block_delta`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum BlockDelta {
    /// Fragment of a text block.
    TextDelta { text: String },
    /// Fragment of a tool-use block's JSON-encoded input.
    InputJsonDelta { partial_json: String },
    /// Thinking, signature, citation and other deltas this crate ignores.
    #[serde(other)]
    Other,
}

/// End-of-turn summary.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub(crate) struct ResultLine {
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub is_error: Option<bool>,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default, alias = "cost_usd")]
    pub total_cost_usd: Option<f64>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub num_turns: Option<u32>,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl ResultLine {
    /// A result succeeds when its subtype is `success` and it is not flagged
    /// as an error.
    pub(crate) fn is_success(&self) -> bool {
        self.subtype.as_deref().unwrap_or("success") == "success" && !self.is_error.unwrap_or(false)
    }

    /// Best available error description for a failed result.
    pub(crate) fn error_message(&self) -> Option<String> {
        if self.is_success() {
            return None;
        }
        self.error
            .clone()
            .or_else(|| (!self.errors.is_empty()).then(|| self.errors.join("; ")))
            .or_else(|| self.result.clone())
            .or_else(|| self.subtype.clone())
    }
}

/// One decoded protocol line.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum RawProtocolEvent {
    SystemInit {
        session_id: Option<String>,
        model: Option<String>,
        tools: Vec<String>,
        cwd: Option<String>,
    },
    ContentBlockStart {
        index: usize,
        content_block: ContentBlock,
    },
    ContentBlockDelta {
        index: usize,
        delta: BlockDelta,
    },
    ContentBlockStop {
        index: usize,
    },
    AssistantMessage {
        content: Vec<ContentBlock>,
    },
    UserMessage {
        content: Vec<ContentBlock>,
    },
    Result(ResultLine),
}

/// Decode one line of agent output.
///
/// # Return value
///
/// - `Ok(Some(event))` for a recognised line.
/// - `Ok(None)` for blank lines and line types that carry nothing the
///   consumer needs.
/// - `Err(AppError::Protocol(..))` for invalid JSON or a recognised type
///   with missing fields.
pub(crate) fn parse_line(line: &str) -> Result<Option<RawProtocolEvent>> {
    if line.trim().is_empty() {
        return Ok(None);
    }

    let value: Value = serde_json::from_str(line)
        .map_err(|e| AppError::Protocol(format!("malformed json: {e}")))?;
    parse_value(value)
}

fn parse_value(value: Value) -> Result<Option<RawProtocolEvent>> {
    let envelope: Envelope = serde_json::from_value(value.clone())
        .map_err(|e| AppError::Protocol(format!("missing message type: {e}")))?;

    let event = match envelope.kind.as_str() {
        "system" if envelope.subtype.as_deref() == Some("init") => {
            let init: InitLine = decode(value, "system/init")?;
            RawProtocolEvent::SystemInit {
                session_id: init.session_id,
                model: init.model,
                tools: init.tools,
                cwd: init.cwd,
            }
        }
        "stream_event" => {
            let wrapper: StreamEventLine = decode(value, "stream_event")?;
            return parse_value(wrapper.event);
        }
        "content_block_start" => {
            let start: BlockStartLine = decode(value, "content_block_start")?;
            RawProtocolEvent::ContentBlockStart {
                index: start.index,
                content_block: start.content_block,
            }
        }
        "content_block_delta" => {
            let delta: BlockDeltaLine = decode(value, "content_block_delta")?;
            RawProtocolEvent::ContentBlockDelta {
                index: delta.index,
                delta: delta.delta,
            }
        }
        "content_block_stop" => {
            let stop: BlockStopLine = decode(value, "content_block_stop")?;
            RawProtocolEvent::ContentBlockStop { index: stop.index }
        }
        "assistant" => {
            let message: MessageLine = decode(value, "assistant")?;
            RawProtocolEvent::AssistantMessage {
                content: message.message.content,
            }
        }
        "user" => {
            let message: MessageLine = decode(value, "user")?;
            RawProtocolEvent::UserMessage {
                content: message.message.content,
            }
        }
        "result" => RawProtocolEvent::Result(decode(value, "result")?),
        other => {
            debug!(
                kind = other,
                subtype = envelope.subtype.as_deref().unwrap_or(""),
                "stream parser: skipping line type"
            );
            return Ok(None);
        }
    };

    Ok(Some(event))
}

fn decode<T: serde::de::DeserializeOwned>(value: Value, kind: &str) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|e| AppError::Protocol(format!("missing required field: {kind}: {e}")))
}
