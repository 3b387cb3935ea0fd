// Token counting module
//
// Uses the cl100k_base BPE vocabulary when the encoder loads; falls back to
// a character-based estimate otherwise. Both sides of the wire treat these
// numbers as best-effort estimates.

use once_cell::sync::Lazy;
use serde_json::Value;
use tiktoken_rs::{cl100k_base, CoreBPE};

use crate::converters::anthropic_to_kiro::collect_text;
use crate::models::anthropic::AnthropicMessagesRequest;

static BPE: Lazy<Option<CoreBPE>> = Lazy::new(|| match cl100k_base() {
    Ok(bpe) => Some(bpe),
    Err(e) => {
        tracing::warn!("cl100k_base encoder unavailable, using estimate: {}", e);
        None
    }
});

pub fn count_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }

    match BPE.as_ref() {
        Some(bpe) => bpe.encode_with_special_tokens(text).len(),
        None => std::cmp::max(1, text.len() / 4),
    }
}

/// Input-token estimate for a request: system text plus the text content of
/// every message, run through the same counter the response paths use.
pub fn estimate_input_tokens(request: &AnthropicMessagesRequest) -> usize {
    let mut text = String::new();

    if let Some(system) = &request.system {
        match system {
            Value::String(s) => text.push_str(s),
            Value::Array(blocks) => {
                for block in blocks {
                    if let Some(t) = block.get("text").and_then(|t| t.as_str()) {
                        text.push_str(t);
                        text.push('\n');
                    }
                }
            }
            _ => {}
        }
    }

    for message in &request.messages {
        text.push_str(&collect_text(&message.content));
        text.push('\n');
    }

    count_tokens(&text)
}
