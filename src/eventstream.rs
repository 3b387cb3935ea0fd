// AWS Event Stream frame decoding
//
// Frame layout, all integers big-endian:
//
//   total_len(4) | header_len(4) | prelude_crc(4) | headers | payload | message_crc(4)
//
// Payload length is total_len - header_len - 16. The CRC fields are not
// verified and headers are skipped entirely; the payload is a UTF-8 JSON
// object, occasionally carrying a stray "vent" prefix left over from a
// header tail that overlaps the payload in the upstream encoding.

use bytes::{Buf, BytesMut};
use serde::Deserialize;
use serde_json::Value;

/// Bytes needed before the two length words can be read
const PRELUDE_LEN: usize = 12;

/// Prelude (12) plus the trailing message CRC (4)
const FRAME_OVERHEAD: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    InitialResponse,
    AssistantResponse,
    ToolUse,
}

/// The payload keys the gateway reads; everything else is ignored
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FramePayload {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub input: Option<Value>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub tool_use_id: Option<String>,
    #[serde(default)]
    pub stop: Option<bool>,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

impl FramePayload {
    pub fn kind(&self) -> EventKind {
        if self.conversation_id.is_some() && self.tool_use_id.is_none() && self.content.is_none() {
            return EventKind::InitialResponse;
        }
        if self.tool_use_id.is_some() && self.name.is_some() {
            return EventKind::ToolUse;
        }
        EventKind::AssistantResponse
    }
}

fn parse_payload(bytes: &[u8]) -> Option<FramePayload> {
    let text = match std::str::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => {
            tracing::debug!("Frame payload is not UTF-8: {}", e);
            return None;
        }
    };
    let text = text.strip_prefix("vent").unwrap_or(text);

    match serde_json::from_str(text) {
        Ok(payload) => Some(payload),
        Err(e) => {
            tracing::debug!("Failed to parse frame payload: {}", e);
            None
        }
    }
}

fn read_lengths(bytes: &[u8]) -> (usize, usize) {
    let total_len = u32::from_be_bytes(bytes[0..4].try_into().unwrap()) as usize;
    let header_len = u32::from_be_bytes(bytes[4..8].try_into().unwrap()) as usize;
    (total_len, header_len)
}

/// Bulk mode: decode a complete buffer.
///
/// A truncated trailing frame ends decoding cleanly; a frame whose payload
/// fails to parse is skipped and decoding continues at the next frame.
pub fn decode_frames(data: &[u8]) -> Vec<FramePayload> {
    let mut events = Vec::new();
    let mut offset = 0usize;

    while offset + PRELUDE_LEN <= data.len() {
        let (total_len, header_len) = read_lengths(&data[offset..]);

        if total_len > data.len() - offset {
            tracing::debug!(
                "Truncated frame: total_len={}, remaining={}",
                total_len,
                data.len() - offset
            );
            break;
        }

        let Some(payload_len) = total_len.checked_sub(header_len + FRAME_OVERHEAD) else {
            // Negative payload length, the framing is broken
            break;
        };

        let payload_start = offset + PRELUDE_LEN + header_len;
        if let Some(payload) = parse_payload(&data[payload_start..payload_start + payload_len]) {
            events.push(payload);
        }

        offset += total_len;
    }

    events
}

/// Incremental mode: feed byte chunks as they arrive, frames are yielded as
/// soon as they are complete. Used by the streaming translator.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Vec<FramePayload> {
        self.buf.extend_from_slice(chunk);
        let mut events = Vec::new();

        loop {
            if self.buf.len() < PRELUDE_LEN {
                break;
            }

            let (total_len, header_len) = read_lengths(&self.buf);

            let Some(payload_len) = total_len.checked_sub(header_len + FRAME_OVERHEAD) else {
                tracing::warn!(
                    "Malformed frame prelude (total_len={}, header_len={}), dropping buffer",
                    total_len,
                    header_len
                );
                self.buf.clear();
                break;
            };

            if self.buf.len() < total_len {
                // Wait for the rest of the frame
                break;
            }

            let payload_start = PRELUDE_LEN + header_len;
            if let Some(payload) = parse_payload(&self.buf[payload_start..payload_start + payload_len])
            {
                events.push(payload);
            }

            self.buf.advance(total_len);
        }

        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build one frame around a JSON payload, with zeroed (unverified) CRCs
    pub fn build_frame(payload: &str) -> Vec<u8> {
        let total_len = (payload.len() + FRAME_OVERHEAD) as u32;
        let mut frame = Vec::with_capacity(total_len as usize);
        frame.extend_from_slice(&total_len.to_be_bytes());
        frame.extend_from_slice(&0u32.to_be_bytes()); // header_len
        frame.extend_from_slice(&[0; 4]); // prelude crc
        frame.extend_from_slice(payload.as_bytes());
        frame.extend_from_slice(&[0; 4]); // message crc
        frame
    }

    #[test]
    fn test_decode_single_frame() {
        let data = build_frame(r#"{"content":"Hello"}"#);
        let events = decode_frames(&data);

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].content.as_deref(), Some("Hello"));
        assert_eq!(events[0].kind(), EventKind::AssistantResponse);
    }

    #[test]
    fn test_decode_multiple_frames() {
        let mut data = build_frame(r#"{"content":"Hello"}"#);
        data.extend(build_frame(r#"{"content":" world"}"#));

        let events = decode_frames(&data);
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].content.as_deref(), Some(" world"));
    }

    #[test]
    fn test_truncated_tail_ends_cleanly() {
        // Two valid frames plus 7 bytes of a third
        let mut data = build_frame(r#"{"content":"a"}"#);
        data.extend(build_frame(r#"{"content":"b"}"#));
        let third = build_frame(r#"{"content":"c"}"#);
        data.extend(&third[..7]);

        let events = decode_frames(&data);
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn test_vent_prefix_stripped() {
        let data = build_frame(r#"vent{"content":"Hello"}"#);
        let events = decode_frames(&data);

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].content.as_deref(), Some("Hello"));
    }

    #[test]
    fn test_invalid_payload_skipped() {
        let mut data = build_frame("not json at all");
        data.extend(build_frame(r#"{"content":"ok"}"#));

        let events = decode_frames(&data);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].content.as_deref(), Some("ok"));
    }

    #[test]
    fn test_negative_payload_length_stops() {
        // header_len larger than total_len
        let mut data = Vec::new();
        data.extend_from_slice(&20u32.to_be_bytes());
        data.extend_from_slice(&100u32.to_be_bytes());
        data.extend_from_slice(&[0; 12]);

        let events = decode_frames(&data);
        assert!(events.is_empty());
    }

    #[test]
    fn test_headers_skipped() {
        // 8 bytes of header content the decoder must step over
        let payload = r#"{"content":"x"}"#;
        let header = b":event-t";
        let total_len = (header.len() + payload.len() + FRAME_OVERHEAD) as u32;

        let mut data = Vec::new();
        data.extend_from_slice(&total_len.to_be_bytes());
        data.extend_from_slice(&(header.len() as u32).to_be_bytes());
        data.extend_from_slice(&[0; 4]);
        data.extend_from_slice(header);
        data.extend_from_slice(payload.as_bytes());
        data.extend_from_slice(&[0; 4]);

        let events = decode_frames(&data);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].content.as_deref(), Some("x"));
    }

    #[test]
    fn test_event_classification() {
        let initial: FramePayload =
            serde_json::from_str(r#"{"conversationId":"conv-1"}"#).unwrap();
        assert_eq!(initial.kind(), EventKind::InitialResponse);

        let tool: FramePayload =
            serde_json::from_str(r#"{"toolUseId":"t1","name":"lookup"}"#).unwrap();
        assert_eq!(tool.kind(), EventKind::ToolUse);

        let text: FramePayload = serde_json::from_str(r#"{"content":"hi"}"#).unwrap();
        assert_eq!(text.kind(), EventKind::AssistantResponse);

        let stop: FramePayload =
            serde_json::from_str(r#"{"toolUseId":"t1","name":"lookup","stop":true}"#).unwrap();
        assert_eq!(stop.kind(), EventKind::ToolUse);
    }

    #[test]
    fn test_incremental_frame_split_across_chunks() {
        let frame = build_frame(r#"{"content":"Hello"}"#);
        let mut decoder = FrameDecoder::new();

        // Feed one byte shy of the full frame
        let events = decoder.feed(&frame[..frame.len() - 1]);
        assert!(events.is_empty());

        let events = decoder.feed(&frame[frame.len() - 1..]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].content.as_deref(), Some("Hello"));
    }

    #[test]
    fn test_incremental_multiple_frames_one_chunk() {
        let mut data = build_frame(r#"{"content":"a"}"#);
        data.extend(build_frame(r#"{"content":"b"}"#));

        let mut decoder = FrameDecoder::new();
        let events = decoder.feed(&data);
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn test_incremental_byte_by_byte() {
        let mut data = build_frame(r#"{"content":"a"}"#);
        data.extend(build_frame(r#"{"toolUseId":"t1","name":"f","stop":true}"#));

        let mut decoder = FrameDecoder::new();
        let mut events = Vec::new();
        for byte in data {
            events.extend(decoder.feed(&[byte]));
        }

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind(), EventKind::AssistantResponse);
        assert_eq!(events[1].kind(), EventKind::ToolUse);
    }
}
