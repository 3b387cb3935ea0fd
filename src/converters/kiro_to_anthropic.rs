// CodeWhisperer to Anthropic converter (batch mode)
//
// Aggregates a decoded event sequence into a single Anthropic message:
// one text block for all content deltas, one tool_use block per toolUseId.

use serde_json::Value;

use crate::eventstream::{EventKind, FramePayload};
use crate::models::anthropic::{
    AnthropicMessagesResponse, AnthropicUsage, ContentBlock,
};
use crate::sse::generate_message_id;
use crate::tokenizer::count_tokens;

struct PendingTool {
    id: String,
    name: String,
    input_json: String,
}

/// Serialize a tool-input fragment the way the stream does: strings pass
/// through, objects and arrays are compact JSON.
pub fn input_fragment(input: &Value) -> Option<String> {
    match input {
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Object(map) if map.is_empty() => None,
        Value::Array(items) if items.is_empty() => None,
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Collect decoded frames into one Anthropic response.
///
/// `input_tokens` is the caller's estimate; output tokens are counted over
/// the aggregated text.
pub fn collect_response(
    frames: &[FramePayload],
    model: &str,
    input_tokens: usize,
) -> AnthropicMessagesResponse {
    let mut text = String::new();
    let mut tools: Vec<PendingTool> = Vec::new();
    let mut any_tool_stopped = false;

    for frame in frames {
        match frame.kind() {
            EventKind::InitialResponse => {}
            EventKind::AssistantResponse => {
                if let Some(content) = &frame.content {
                    text.push_str(content);
                }
            }
            EventKind::ToolUse => {
                let id = frame.tool_use_id.clone().unwrap_or_default();

                if !tools.iter().any(|t| t.id == id) {
                    tools.push(PendingTool {
                        id: id.clone(),
                        name: frame.name.clone().unwrap_or_default(),
                        input_json: String::new(),
                    });
                }
                let tool = tools.iter_mut().find(|t| t.id == id).unwrap();

                if let Some(fragment) = frame.input.as_ref().and_then(input_fragment) {
                    tool.input_json.push_str(&fragment);
                }
                if frame.stop == Some(true) {
                    any_tool_stopped = true;
                }
            }
        }
    }

    let mut content: Vec<ContentBlock> = Vec::new();
    if !text.is_empty() {
        content.push(ContentBlock::Text { text: text.clone() });
    }

    for tool in tools {
        let input = if tool.input_json.is_empty() {
            Value::Object(Default::default())
        } else {
            serde_json::from_str(&tool.input_json).unwrap_or_else(|e| {
                tracing::warn!(
                    "Failed to parse tool '{}' input, substituting empty object: {}",
                    tool.name,
                    e
                );
                Value::Object(Default::default())
            })
        };
        content.push(ContentBlock::ToolUse {
            id: tool.id,
            name: tool.name,
            input,
        });
    }

    let stop_reason = if any_tool_stopped { "tool_use" } else { "end_turn" };

    AnthropicMessagesResponse {
        id: generate_message_id(),
        response_type: "message".to_string(),
        role: "assistant".to_string(),
        content,
        model: model.to_string(),
        stop_reason: Some(stop_reason.to_string()),
        stop_sequence: None,
        usage: AnthropicUsage {
            input_tokens: input_tokens as i32,
            output_tokens: count_tokens(&text) as i32,
        },
    }
}
