//! Incremental decoder from raw agent output to [`NormalizedEvent`]s.
//!
//! [`StreamParser`] accepts stdout bytes in arbitrarily sized chunks, frames
//! them into lines with [`LineCodec`], decodes each line with
//! [`protocol::parse_line`](super::protocol) and pushes the resulting
//! normalized events into its sink in line order.
//!
//! Content blocks are tracked per index between `content_block_start` and
//! `content_block_stop`:
//!
//! - text blocks stream a [`NormalizedEvent::Delta`] for every fragment;
//! - tool-use blocks buffer their JSON fragments and emit a single
//!   [`NormalizedEvent::ToolUseStart`] once the block closes;
//! - tool-result blocks are emitted whole as soon as they start.
//!
//! A parser holds state for exactly one process run. Build a fresh one for
//! every invocation so unclosed blocks from an aborted run cannot leak.

use std::collections::HashMap;

use bytes::BytesMut;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::codec::Decoder;
use tracing::{debug, warn};

use super::codec::LineCodec;
use super::protocol::{self, BlockDelta, RawProtocolEvent, ResultLine};
use crate::models::event::{flatten_tool_result, ContentBlock, NormalizedEvent};

/// Receiving end of a parser's output.
pub type EventSink = mpsc::UnboundedSender<NormalizedEvent>;

/// Per-index state held while a content block is open.
#[derive(Debug)]
enum BlockAccumulator {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        initial_input: Value,
        partial_json: String,
    },
}

/// Streaming protocol decoder for one agent process run.
#[derive(Debug)]
pub struct StreamParser {
    codec: LineCodec,
    buffer: BytesMut,
    blocks: HashMap<usize, BlockAccumulator>,
    sink: EventSink,
    skipped_lines: usize,
}

impl StreamParser {
    /// Create a parser that delivers events to `sink`.
    #[must_use]
    pub fn new(sink: EventSink) -> Self {
        Self {
            codec: LineCodec::new(),
            buffer: BytesMut::new(),
            blocks: HashMap::new(),
            sink,
            skipped_lines: 0,
        }
    }

    /// Append a chunk of raw output and process every line it completes.
    ///
    /// A trailing partial line stays buffered until a later chunk (or
    /// [`flush`](Self::flush)) completes it. Chunk boundaries may fall
    /// anywhere, including inside a multi-byte UTF-8 sequence.
    pub fn feed(&mut self, chunk: impl AsRef<[u8]>) {
        self.buffer.extend_from_slice(chunk.as_ref());

        loop {
            match self.codec.decode(&mut self.buffer) {
                Ok(Some(line)) => self.process_line(&line),
                Ok(None) => break,
                Err(err) => {
                    self.skipped_lines += 1;
                    warn!(error = %err, "stream parser: framing error, skipping line");
                }
            }
        }
    }

    /// Process what is left once the producing process has exited.
    ///
    /// A final line without a terminating newline is processed like any
    /// other; if it does not decode it is discarded and counted as skipped.
    /// Content blocks that never closed are dropped.
    pub fn flush(&mut self) {
        match self.codec.decode_eof(&mut self.buffer) {
            Ok(Some(line)) => self.process_line(&line),
            Ok(None) => {}
            Err(err) => {
                self.skipped_lines += 1;
                debug!(error = %err, "stream parser: discarding unterminated tail");
            }
        }
        self.buffer.clear();

        if !self.blocks.is_empty() {
            debug!(
                open_blocks = self.blocks.len(),
                "stream parser: dropping content blocks that never closed"
            );
            self.blocks.clear();
        }
    }

    /// Number of lines discarded because they could not be decoded.
    #[must_use]
    pub fn skipped_lines(&self) -> usize {
        self.skipped_lines
    }

    /// Number of content blocks currently open.
    #[must_use]
    pub fn open_blocks(&self) -> usize {
        self.blocks.len()
    }

    fn process_line(&mut self, line: &str) {
        match protocol::parse_line(line) {
            Ok(Some(event)) => self.handle(event),
            Ok(None) => {}
            Err(err) => {
                self.skipped_lines += 1;
                warn!(error = %err, raw_line = %line, "stream parser: parse error, skipping line");
            }
        }
    }

    fn handle(&mut self, event: RawProtocolEvent) {
        match event {
            RawProtocolEvent::SystemInit {
                session_id,
                model,
                tools,
                cwd,
            } => self.emit(NormalizedEvent::Init {
                session_id,
                model,
                tools,
                cwd,
            }),
            RawProtocolEvent::ContentBlockStart {
                index,
                content_block,
            } => self.start_block(index, content_block),
            RawProtocolEvent::ContentBlockDelta { index, delta } => self.apply_delta(index, delta),
            RawProtocolEvent::ContentBlockStop { index } => self.stop_block(index),
            RawProtocolEvent::AssistantMessage { content } => {
                self.emit(NormalizedEvent::AssistantComplete { content });
            }
            RawProtocolEvent::UserMessage { content } => {
                for block in content {
                    if let ContentBlock::ToolResult { .. } = block {
                        self.emit_tool_result(block);
                    }
                }
            }
            RawProtocolEvent::Result(result) => self.emit(result_event(result)),
        }
    }

    fn start_block(&mut self, index: usize, block: ContentBlock) {
        match block {
            ContentBlock::Text { text } => {
                self.blocks.insert(index, BlockAccumulator::Text { text });
            }
            ContentBlock::ToolUse { id, name, input } => {
                self.blocks.insert(
                    index,
                    BlockAccumulator::ToolUse {
                        id,
                        name,
                        initial_input: input,
                        partial_json: String::new(),
                    },
                );
            }
            block @ ContentBlock::ToolResult { .. } => self.emit_tool_result(block),
            ContentBlock::Thinking { .. } | ContentBlock::Other => {
                debug!(index, "stream parser: ignoring content block kind");
            }
        }
    }

    fn apply_delta(&mut self, index: usize, delta: BlockDelta) {
        match delta {
            BlockDelta::TextDelta { text } => {
                match self.blocks.get_mut(&index) {
                    Some(BlockAccumulator::Text { text: acc }) => acc.push_str(&text),
                    Some(BlockAccumulator::ToolUse { .. }) => {
                        warn!(index, "stream parser: text delta for a tool-use block");
                    }
                    None => debug!(index, "stream parser: text delta without open block"),
                }
                self.emit(NormalizedEvent::Delta { text });
            }
            BlockDelta::InputJsonDelta { partial_json } => match self.blocks.get_mut(&index) {
                Some(BlockAccumulator::ToolUse {
                    partial_json: acc, ..
                }) => acc.push_str(&partial_json),
                _ => debug!(index, "stream parser: json delta without open tool-use block"),
            },
            BlockDelta::Other => {}
        }
    }

    fn stop_block(&mut self, index: usize) {
        match self.blocks.remove(&index) {
            Some(BlockAccumulator::ToolUse {
                id,
                name,
                initial_input,
                partial_json,
            }) => {
                if partial_json.trim().is_empty() {
                    self.emit(NormalizedEvent::ToolUseStart {
                        id,
                        name,
                        input: normalize_input(initial_input),
                    });
                    return;
                }

                match serde_json::from_str::<Value>(&partial_json) {
                    Ok(input) => self.emit(NormalizedEvent::ToolUseStart { id, name, input }),
                    Err(err) => {
                        warn!(tool_use_id = %id, tool = %name, error = %err, "stream parser: tool input is not valid json");
                        self.emit(NormalizedEvent::error(format!(
                            "failed to parse input for tool {name} ({id}): {err}"
                        )));
                    }
                }
            }
            Some(BlockAccumulator::Text { text }) => {
                debug!(index, chars = text.len(), "stream parser: text block closed");
            }
            None => debug!(index, "stream parser: stop for unknown block"),
        }
    }

    fn emit_tool_result(&self, block: ContentBlock) {
        if let ContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } = block
        {
            self.emit(NormalizedEvent::ToolResult {
                tool_use_id,
                content: flatten_tool_result(&content),
                is_error: is_error.unwrap_or(false),
            });
        }
    }

    fn emit(&self, event: NormalizedEvent) {
        if self.sink.send(event).is_err() {
            debug!("stream parser: event sink closed, dropping event");
        }
    }
}

/// Missing tool input is reported as an empty object.
fn normalize_input(input: Value) -> Value {
    if input.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        input
    }
}

fn result_event(result: ResultLine) -> NormalizedEvent {
    let success = result.is_success();
    let error = result.error_message();
    NormalizedEvent::Result {
        success,
        subtype: result.subtype,
        result: result.result,
        error,
        cost_usd: result.total_cost_usd,
        duration_ms: result.duration_ms,
        num_turns: result.num_turns,
        session_id: result.session_id,
    }
}
