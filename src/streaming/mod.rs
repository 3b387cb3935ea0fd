// Streaming translation: CodeWhisperer events to Anthropic SSE
//
// One StreamHandler per request, fed decoded frames by the proxy. Text
// content passes through a tag splitter so <thinking>...</thinking> segments
// become their own content blocks; tool-use events open, fill, and close
// tool_use blocks. Emitted records follow the Anthropic ordering contract:
//
//   message_start, ping,
//     (content_block_start, content_block_delta*, content_block_stop)*
//   message_delta, message_stop

use serde_json::json;

use crate::converters::kiro_to_anthropic::input_fragment;
use crate::eventstream::{EventKind, FramePayload};
use crate::sse::{generate_message_id, sse_event};
use crate::tokenizer::count_tokens;

const THINKING_START_TAG: &str = "<thinking>";
const THINKING_END_TAG: &str = "</thinking>";

/// Length of the longest proper suffix of `buffer` that is a prefix of
/// `tag`. Such a suffix may be the beginning of the tag split across chunk
/// boundaries and must not be emitted yet.
fn pending_tag_suffix(buffer: &str, tag: &str) -> usize {
    let max_len = buffer.len().min(tag.len().saturating_sub(1));
    for len in (1..=max_len).rev() {
        if buffer.ends_with(&tag[..len]) {
            return len;
        }
    }
    0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Text,
    Thinking,
    ToolUse,
}

#[derive(Debug)]
struct ActiveTool {
    input: String,
}

pub struct StreamHandler {
    model: String,
    input_tokens: usize,
    message_id: String,

    message_start_sent: bool,
    block_index: i64,
    block_open: Option<BlockKind>,

    // Thinking-tag splitter state
    in_think_block: bool,
    think_buffer: String,

    // Aggregates for end-of-stream token counting
    response_buffer: String,
    tool_inputs: Vec<String>,

    tool_active: Option<ActiveTool>,
    finished: bool,
}

impl StreamHandler {
    pub fn new(model: &str, input_tokens: usize) -> Self {
        Self {
            model: model.to_string(),
            input_tokens,
            message_id: generate_message_id(),
            message_start_sent: false,
            block_index: -1,
            block_open: None,
            in_think_block: false,
            think_buffer: String::new(),
            response_buffer: String::new(),
            tool_inputs: Vec::new(),
            tool_active: None,
            finished: false,
        }
    }

    /// Translate one decoded frame into zero or more SSE records
    pub fn handle_event(&mut self, payload: &FramePayload, out: &mut Vec<String>) {
        match payload.kind() {
            EventKind::InitialResponse => self.handle_initial_response(out),
            EventKind::AssistantResponse => {
                if let Some(content) = payload.content.clone() {
                    if !content.is_empty() {
                        self.handle_text(&content, out);
                    }
                }
            }
            EventKind::ToolUse => self.handle_tool_use(payload, out),
        }
    }

    /// Close any open block and emit the closing message_delta/message_stop
    /// pair. Idempotent; called once when the upstream stream ends.
    pub fn finish(&mut self) -> Vec<String> {
        let mut out = Vec::new();
        if self.finished {
            return out;
        }
        self.finished = true;

        self.ensure_message_start(&mut out);

        // A retained tag prefix that never completed is ordinary content
        if !self.think_buffer.is_empty() {
            let residue = std::mem::take(&mut self.think_buffer);
            if self.in_think_block {
                self.emit_thinking(&residue, &mut out);
            } else {
                self.emit_text(&residue, &mut out);
            }
        }

        if let Some(tool) = self.tool_active.take() {
            self.tool_inputs.push(tool.input);
        }
        self.close_block(&mut out);

        let output_tokens =
            count_tokens(&format!("{}{}", self.response_buffer, self.tool_inputs.concat()));

        out.push(sse_event(
            "message_delta",
            &json!({
                "type": "message_delta",
                "delta": {"stop_reason": "end_turn", "stop_sequence": null},
                "usage": {"output_tokens": output_tokens},
            }),
        ));
        out.push(sse_event("message_stop", &json!({"type": "message_stop"})));
        out
    }

    // ==============================================================================================
    // Event handling
    // ==============================================================================================

    fn handle_initial_response(&mut self, out: &mut Vec<String>) {
        self.ensure_message_start(out);
    }

    fn ensure_message_start(&mut self, out: &mut Vec<String>) {
        if self.message_start_sent {
            return;
        }
        self.message_start_sent = true;

        out.push(sse_event(
            "message_start",
            &json!({
                "type": "message_start",
                "message": {
                    "id": self.message_id,
                    "type": "message",
                    "role": "assistant",
                    "content": [],
                    "model": self.model,
                    "stop_reason": null,
                    "stop_sequence": null,
                    "usage": {
                        "input_tokens": self.input_tokens,
                        "output_tokens": 1,
                    }
                }
            }),
        ));
        out.push(sse_event("ping", &json!({"type": "ping"})));
    }

    fn handle_text(&mut self, content: &str, out: &mut Vec<String>) {
        self.ensure_message_start(out);

        // Text after an unterminated tool block closes it
        if let Some(tool) = self.tool_active.take() {
            self.tool_inputs.push(tool.input);
            self.close_block(out);
        }

        self.think_buffer.push_str(content);

        loop {
            if self.think_buffer.is_empty() {
                break;
            }

            if !self.in_think_block {
                if let Some(pos) = self.think_buffer.find(THINKING_START_TAG) {
                    let before = self.think_buffer[..pos].to_string();
                    if !before.is_empty() {
                        self.emit_text(&before, out);
                    }
                    self.think_buffer.drain(..pos + THINKING_START_TAG.len());

                    self.close_block(out);
                    self.open_block(BlockKind::Thinking, out);
                    self.in_think_block = true;
                    continue;
                }

                // Hold back a chunk suffix that may be the start of the tag
                let pending = pending_tag_suffix(&self.think_buffer, THINKING_START_TAG);
                let emit_len = self.think_buffer.len() - pending;
                if emit_len > 0 {
                    let chunk: String = self.think_buffer.drain(..emit_len).collect();
                    self.emit_text(&chunk, out);
                }
                break;
            }

            if let Some(pos) = self.think_buffer.find(THINKING_END_TAG) {
                let chunk = self.think_buffer[..pos].to_string();
                if !chunk.is_empty() {
                    self.emit_thinking(&chunk, out);
                }
                self.think_buffer.drain(..pos + THINKING_END_TAG.len());

                self.close_block(out);
                self.in_think_block = false;
                continue;
            }

            let pending = pending_tag_suffix(&self.think_buffer, THINKING_END_TAG);
            let emit_len = self.think_buffer.len() - pending;
            if emit_len > 0 {
                let chunk: String = self.think_buffer.drain(..emit_len).collect();
                self.emit_thinking(&chunk, out);
            }
            break;
        }
    }

    fn handle_tool_use(&mut self, payload: &FramePayload, out: &mut Vec<String>) {
        self.ensure_message_start(out);

        let is_stop = payload.stop.unwrap_or(false);

        // Start: toolUseId + name present and no tool in progress
        if self.tool_active.is_none() {
            let (Some(id), Some(name)) = (payload.tool_use_id.as_ref(), payload.name.as_ref())
            else {
                return;
            };

            tracing::debug!("Starting tool use: {} (id: {})", name, id);

            // Flush splitter residue so block ordering stays intact
            if !self.think_buffer.is_empty() {
                let residue = std::mem::take(&mut self.think_buffer);
                if self.in_think_block {
                    self.emit_thinking(&residue, out);
                } else {
                    self.emit_text(&residue, out);
                }
            }
            self.close_block(out);

            self.block_index += 1;
            out.push(sse_event(
                "content_block_start",
                &json!({
                    "type": "content_block_start",
                    "index": self.block_index,
                    "content_block": {
                        "type": "tool_use",
                        "id": id,
                        "name": name,
                        "input": {},
                    }
                }),
            ));
            self.block_open = Some(BlockKind::ToolUse);
            self.tool_active = Some(ActiveTool {
                input: String::new(),
            });
        }

        // Fragment: accumulate and forward as input_json_delta
        if let Some(fragment) = payload.input.as_ref().and_then(input_fragment) {
            if let Some(tool) = self.tool_active.as_mut() {
                tool.input.push_str(&fragment);
                out.push(sse_event(
                    "content_block_delta",
                    &json!({
                        "type": "content_block_delta",
                        "index": self.block_index,
                        "delta": {
                            "type": "input_json_delta",
                            "partial_json": fragment,
                        }
                    }),
                ));
            }
        }

        // Stop: close the block and keep the input for token counting
        if is_stop {
            if let Some(tool) = self.tool_active.take() {
                tracing::debug!("Completed tool use ({} input chars)", tool.input.len());
                self.tool_inputs.push(tool.input);
                self.close_block(out);
            }
        }
    }

    // ==============================================================================================
    // Block and delta emission
    // ==============================================================================================

    fn open_block(&mut self, kind: BlockKind, out: &mut Vec<String>) {
        self.block_index += 1;
        self.block_open = Some(kind);

        let content_block = match kind {
            BlockKind::Text => json!({"type": "text", "text": ""}),
            BlockKind::Thinking => json!({"type": "thinking", "thinking": ""}),
            BlockKind::ToolUse => unreachable!("tool blocks are opened in handle_tool_use"),
        };

        out.push(sse_event(
            "content_block_start",
            &json!({
                "type": "content_block_start",
                "index": self.block_index,
                "content_block": content_block,
            }),
        ));
    }

    fn close_block(&mut self, out: &mut Vec<String>) {
        if self.block_open.take().is_none() {
            return;
        }
        out.push(sse_event(
            "content_block_stop",
            &json!({
                "type": "content_block_stop",
                "index": self.block_index,
            }),
        ));
    }

    fn emit_text(&mut self, text: &str, out: &mut Vec<String>) {
        if self.block_open != Some(BlockKind::Text) {
            self.close_block(out);
            self.open_block(BlockKind::Text, out);
        }
        self.response_buffer.push_str(text);
        out.push(sse_event(
            "content_block_delta",
            &json!({
                "type": "content_block_delta",
                "index": self.block_index,
                "delta": {"type": "text_delta", "text": text},
            }),
        ));
    }

    fn emit_thinking(&mut self, text: &str, out: &mut Vec<String>) {
        if self.block_open != Some(BlockKind::Thinking) {
            self.close_block(out);
            self.open_block(BlockKind::Thinking, out);
        }
        out.push(sse_event(
            "content_block_delta",
            &json!({
                "type": "content_block_delta",
                "index": self.block_index,
                "delta": {"type": "thinking_delta", "thinking": text},
            }),
        ));
    }
}
