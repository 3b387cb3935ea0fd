// Server-Sent Events formatting for the Anthropic Messages dialect

use chrono::Utc;
use serde_json::{json, Value};

/// Format one SSE record. Empty event names and null payloads produce
/// nothing, so callers can emit unconditionally.
///
/// serde_json writes compact output and leaves non-ASCII text unescaped.
pub fn sse_event(event: &str, data: &Value) -> String {
    if event.is_empty() || data.is_null() {
        return String::new();
    }
    format!("event: {}\ndata: {}\n\n", event, data)
}

/// Anthropic error record for streams that have already started
pub fn error_event(message: &str) -> String {
    sse_event(
        "error",
        &json!({
            "type": "error",
            "error": {
                "type": "api_error",
                "message": message,
            }
        }),
    )
}

pub fn generate_message_id() -> String {
    format!("msg_{}", Utc::now().format("%Y%m%d%H%M%S"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sse_event_format() {
        let record = sse_event("ping", &json!({"type": "ping"}));
        assert_eq!(record, "event: ping\ndata: {\"type\":\"ping\"}\n\n");
    }

    #[test]
    fn test_empty_event_name_produces_nothing() {
        assert_eq!(sse_event("", &json!({"type": "ping"})), "");
    }

    #[test]
    fn test_null_payload_produces_nothing() {
        assert_eq!(sse_event("ping", &Value::Null), "");
    }

    #[test]
    fn test_non_ascii_preserved() {
        let record = sse_event("content_block_delta", &json!({"text": "héllo 世界"}));
        assert!(record.contains("héllo 世界"));
        assert!(!record.contains("\\u"));
    }

    #[test]
    fn test_error_event_shape() {
        let record = error_event("upstream exploded");
        assert!(record.starts_with("event: error\n"));
        assert!(record.contains("\"type\":\"api_error\""));
        assert!(record.contains("upstream exploded"));
    }

    #[test]
    fn test_message_id_format() {
        let id = generate_message_id();
        assert!(id.starts_with("msg_"));
        assert_eq!(id.len(), "msg_".len() + 14);
        assert!(id["msg_".len()..].chars().all(|c| c.is_ascii_digit()));
    }
}
