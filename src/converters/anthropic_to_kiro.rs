// Anthropic to CodeWhisperer converter
//
// Builds the conversationState envelope: the last inbound message becomes
// currentMessage, earlier messages fold into a strict user/assistant history,
// and the system prompt is injected as a synthetic leading turn.

use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

use crate::models::anthropic::{
    AnthropicMessagesRequest, AnthropicTool, ContentBlock, MessageContent,
};
use crate::models::kiro::{
    AssistantResponseMessage, CodeWhispererRequest, ConversationState, CurrentMessage,
    HistoryEntry, InputSchema, ToolSpec, ToolSpecification, UserInputMessage,
    UserInputMessageContext,
};

/// CodeWhisperer rejects empty message content, so empty text gets this stand-in
const EMPTY_CONTENT_PLACEHOLDER: &str = "answer for user question";

const SYSTEM_ACK: &str = "I will follow these instructions";

// ==================================================================================================
// Text Extraction
// ==================================================================================================

/// Concatenate the text of `text` blocks and the inner text of `tool_result`
/// blocks with newlines. Other block kinds carry no extractable text.
pub fn collect_text(content: &MessageContent) -> String {
    match content {
        MessageContent::Text(text) => text.clone(),
        MessageContent::Blocks(blocks) => {
            let mut parts: Vec<String> = Vec::new();
            for block in blocks {
                match block {
                    ContentBlock::Text { text } => {
                        if !text.is_empty() {
                            parts.push(text.clone());
                        }
                    }
                    ContentBlock::ToolResult { content, .. } => {
                        if let Some(inner) = content {
                            parts.extend(tool_result_texts(inner));
                        }
                    }
                    _ => {}
                }
            }
            parts.join("\n")
        }
    }
}

fn tool_result_texts(content: &Value) -> Vec<String> {
    match content {
        Value::String(text) => vec![text.clone()],
        Value::Array(items) => items
            .iter()
            .filter_map(|item| {
                if item.get("type").and_then(|t| t.as_str()) == Some("text") {
                    item.get("text").and_then(|t| t.as_str()).map(String::from)
                } else {
                    None
                }
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Extracted text with the placeholder substituted when nothing remains
pub fn message_text(content: &MessageContent) -> String {
    let text = collect_text(content);
    if text.is_empty() {
        EMPTY_CONTENT_PLACEHOLDER.to_string()
    } else {
        text
    }
}

/// System prompt as a list of texts: a string yields one entry, a block list
/// one entry per element.
fn system_texts(system: &Value) -> Vec<String> {
    match system {
        Value::String(text) => vec![text.clone()],
        Value::Array(items) => items
            .iter()
            .map(|item| match item.get("text").and_then(|t| t.as_str()) {
                Some(text) => text.to_string(),
                None => match item {
                    Value::String(s) => s.clone(),
                    Value::Object(_) => String::new(),
                    other => other.to_string(),
                },
            })
            .collect(),
        _ => vec![system.to_string()],
    }
}

// ==================================================================================================
// Tool Translation
// ==================================================================================================

fn convert_tools(tools: &[AnthropicTool]) -> Vec<ToolSpec> {
    tools
        .iter()
        .map(|tool| ToolSpec {
            tool_specification: ToolSpecification {
                name: tool.name.clone(),
                description: tool.description.clone().unwrap_or_default(),
                input_schema: InputSchema {
                    json: tool.input_schema.clone(),
                },
            },
        })
        .collect()
}

// ==================================================================================================
// Request Building
// ==================================================================================================

fn user_entry(content: String, model_id: &str) -> HistoryEntry {
    HistoryEntry::User {
        user_input_message: UserInputMessage {
            content,
            model_id: model_id.to_string(),
            origin: "AI_EDITOR".to_string(),
            user_input_message_context: None,
        },
    }
}

fn assistant_entry(content: String) -> HistoryEntry {
    HistoryEntry::Assistant {
        assistant_response_message: AssistantResponseMessage {
            content,
            tool_uses: vec![],
        },
    }
}

/// Build the CodeWhisperer request for an Anthropic Messages request.
///
/// Model names go through the alias table; unknown names pass through
/// unchanged and are not rejected here.
pub fn build_codewhisperer_request(
    request: &AnthropicMessagesRequest,
    profile_arn: &str,
    model_mapping: &HashMap<String, String>,
) -> Result<CodeWhispererRequest, String> {
    let Some((last, earlier)) = request.messages.split_last() else {
        return Err("messages cannot be empty".to_string());
    };

    let model_id = model_mapping
        .get(&request.model)
        .cloned()
        .unwrap_or_else(|| request.model.clone());

    debug!(
        "Converting request: model={} -> {}, messages={}, tools={}",
        request.model,
        model_id,
        request.messages.len(),
        request.tools.as_ref().map_or(0, |t| t.len()),
    );

    let mut history: Vec<HistoryEntry> = Vec::new();

    // System prompt becomes a synthetic instruction/acknowledgement turn
    if let Some(system) = &request.system {
        for text in system_texts(system) {
            history.push(user_entry(text, &model_id));
            history.push(assistant_entry(SYSTEM_ACK.to_string()));
        }
    }

    // Fold earlier messages into strict user-then-assistant alternation.
    // Assistant messages with no preceding user entry are dropped.
    let mut i = 0;
    while i < earlier.len() {
        let message = &earlier[i];
        if message.role == "user" {
            history.push(user_entry(message_text(&message.content), &model_id));

            if i + 1 < earlier.len() && earlier[i + 1].role == "assistant" {
                history.push(assistant_entry(message_text(&earlier[i + 1].content)));
                i += 1;
            }
        }
        i += 1;
    }

    let mut context = UserInputMessageContext::default();
    if let Some(tools) = &request.tools {
        if !tools.is_empty() {
            context.tools = Some(convert_tools(tools));
        }
    }

    Ok(CodeWhispererRequest {
        profile_arn: profile_arn.to_string(),
        conversation_state: ConversationState {
            chat_trigger_type: "MANUAL".to_string(),
            conversation_id: Uuid::new_v4().to_string(),
            current_message: CurrentMessage {
                user_input_message: UserInputMessage {
                    content: message_text(&last.content),
                    model_id,
                    origin: "AI_EDITOR".to_string(),
                    user_input_message_context: Some(context),
                },
            },
            history,
        },
    })
}
