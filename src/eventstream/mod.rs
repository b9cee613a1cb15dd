//! Incremental decoder for the upstream's binary event-stream framing.
//!
//! A frame is laid out as:
//!
//! ```text
//! total_len u32 | headers_len u32 | prelude_crc u32 | headers | payload | message_crc u32
//! ```
//!
//! All integers are big-endian and both checksums are CRC32 (IEEE). The
//! decoder buffers partial frames across [`FrameDecoder::feed`] calls, so
//! transport chunk boundaries never change the decoded event sequence.

mod encode;
pub mod header;

use bytes::{Buf, BytesMut};
use serde::Deserialize;
use serde_json::Value;

pub use encode::{encode_event_frame, encode_exception_frame, encode_frame};

use self::header::{header_str, parse_headers};

pub(crate) const PRELUDE_LEN: usize = 12;
pub(crate) const TRAILER_LEN: usize = 4;
const MIN_FRAME_LEN: usize = PRELUDE_LEN + TRAILER_LEN;
/// Upper bound on a single frame; larger prefixes are treated as corruption.
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// One semantic event decoded from an upstream frame.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedEvent {
    Content {
        text: String,
    },
    ToolCallFragment {
        id: Option<String>,
        name: Option<String>,
        arguments_chunk: String,
        stop: bool,
    },
    Usage {
        metering: Value,
    },
    ContextUsage {
        percentage: f64,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("frame length {len} outside allowed range (max {max})")]
    InvalidLength { len: usize, max: usize },
    #[error("headers length {headers_len} does not fit in frame of {total_len} bytes")]
    InvalidHeadersLength { headers_len: usize, total_len: usize },
    #[error("prelude checksum mismatch (expected {expected:#010x}, got {actual:#010x})")]
    PreludeChecksum { expected: u32, actual: u32 },
    #[error("message checksum mismatch (expected {expected:#010x}, got {actual:#010x})")]
    MessageChecksum { expected: u32, actual: u32 },
    #[error("malformed header: {0}")]
    Header(String),
    #[error("upstream stream ended inside a frame ({buffered} bytes buffered)")]
    Truncated { buffered: usize },
    #[error("upstream {kind}: {message}")]
    UpstreamException { kind: String, message: String },
}

#[derive(Deserialize)]
struct AssistantResponsePayload {
    #[serde(default)]
    content: Option<String>,
    #[serde(default, rename = "followupPrompt")]
    followup_prompt: Option<Value>,
}

#[derive(Deserialize)]
struct ToolUsePayload {
    #[serde(default)]
    name: Option<String>,
    #[serde(default, rename = "toolUseId")]
    tool_use_id: Option<String>,
    #[serde(default)]
    input: Option<Value>,
    #[serde(default)]
    stop: bool,
}

#[derive(Deserialize)]
struct MeteringPayload {
    usage: Value,
}

#[derive(Deserialize)]
struct ContextUsagePayload {
    #[serde(rename = "contextUsagePercentage")]
    percentage: f64,
}

#[derive(Deserialize)]
struct ExceptionPayload {
    #[serde(default, alias = "Message")]
    message: Option<String>,
}

/// Incremental frame decoder. One instance per upstream response.
pub struct FrameDecoder {
    buffer: BytesMut,
    max_frame_len: usize,
    last_content: Option<String>,
}

impl FrameDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_frame_len(DEFAULT_MAX_FRAME_LEN)
    }

    #[must_use]
    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8 * 1024),
            max_frame_len: max_frame_len.max(MIN_FRAME_LEN),
            last_content: None,
        }
    }

    /// Feed raw bytes and return every event completed by them.
    ///
    /// # Errors
    ///
    /// Returns [`FrameDecodeError`] on corrupt framing or an upstream
    /// exception frame. The decoder must not be fed again afterwards.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<DecodedEvent>, FrameDecodeError> {
        let mut out = Vec::new();
        self.feed_into(chunk, &mut out)?;
        Ok(out)
    }

    /// Feed raw bytes and append completed events into a caller-provided buffer.
    ///
    /// # Errors
    ///
    /// See [`FrameDecoder::feed`].
    pub fn feed_into(
        &mut self,
        chunk: &[u8],
        out: &mut Vec<DecodedEvent>,
    ) -> Result<(), FrameDecodeError> {
        self.buffer.extend_from_slice(chunk);

        while self.buffer.len() >= PRELUDE_LEN {
            let total_len = read_u32_be(&self.buffer[0..4]) as usize;
            if !(MIN_FRAME_LEN..=self.max_frame_len).contains(&total_len) {
                return Err(FrameDecodeError::InvalidLength {
                    len: total_len,
                    max: self.max_frame_len,
                });
            }
            let headers_len = read_u32_be(&self.buffer[4..8]) as usize;
            if headers_len > total_len - MIN_FRAME_LEN {
                return Err(FrameDecodeError::InvalidHeadersLength {
                    headers_len,
                    total_len,
                });
            }
            let expected = read_u32_be(&self.buffer[8..12]);
            let actual = crc32fast::hash(&self.buffer[0..8]);
            if expected != actual {
                return Err(FrameDecodeError::PreludeChecksum { expected, actual });
            }
            if self.buffer.len() < total_len {
                break;
            }

            let frame = self.buffer.split_to(total_len).freeze();
            self.decode_frame(&frame, headers_len, out)?;
        }

        if self.buffer.is_empty() && self.buffer.capacity() > 64 * 1024 {
            self.buffer = BytesMut::with_capacity(8 * 1024);
        }
        Ok(())
    }

    /// Bytes held for an incomplete trailing frame.
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Check that the upstream did not stop in the middle of a frame.
    ///
    /// # Errors
    ///
    /// Returns [`FrameDecodeError::Truncated`] when bytes remain buffered.
    pub fn finish(&self) -> Result<(), FrameDecodeError> {
        if self.buffer.is_empty() {
            Ok(())
        } else {
            Err(FrameDecodeError::Truncated {
                buffered: self.buffer.len(),
            })
        }
    }

    fn decode_frame(
        &mut self,
        frame: &[u8],
        headers_len: usize,
        out: &mut Vec<DecodedEvent>,
    ) -> Result<(), FrameDecodeError> {
        let crc_offset = frame.len() - TRAILER_LEN;
        let expected = read_u32_be(&frame[crc_offset..]);
        let actual = crc32fast::hash(&frame[..crc_offset]);
        if expected != actual {
            return Err(FrameDecodeError::MessageChecksum { expected, actual });
        }

        let headers_end = PRELUDE_LEN + headers_len;
        let headers = parse_headers(&frame[PRELUDE_LEN..headers_end])?;
        let payload = &frame[headers_end..crc_offset];

        match header_str(&headers, ":message-type").unwrap_or("event") {
            "event" => {}
            kind @ ("exception" | "error") => {
                let label = header_str(&headers, ":exception-type")
                    .or_else(|| header_str(&headers, ":error-code"))
                    .unwrap_or(kind)
                    .to_string();
                let message = serde_json::from_slice::<ExceptionPayload>(payload)
                    .ok()
                    .and_then(|p| p.message)
                    .or_else(|| header_str(&headers, ":error-message").map(str::to_string))
                    .unwrap_or_else(|| String::from_utf8_lossy(payload).into_owned());
                return Err(FrameDecodeError::UpstreamException {
                    kind: label,
                    message,
                });
            }
            other => {
                tracing::debug!(message_type = other, "dropping frame with unknown message type");
                return Ok(());
            }
        }

        let event_type = match header_str(&headers, ":event-type") {
            Some(event_type) => event_type,
            None => classify_by_payload_shape(payload),
        };
        self.classify_event(event_type, payload, out);
        Ok(())
    }

    fn classify_event(&mut self, event_type: &str, payload: &[u8], out: &mut Vec<DecodedEvent>) {
        match event_type {
            "assistantResponseEvent" => {
                let Some(parsed) = parse_payload::<AssistantResponsePayload>(event_type, payload)
                else {
                    return;
                };
                if parsed.followup_prompt.is_some() {
                    return;
                }
                let Some(text) = parsed.content else {
                    return;
                };
                if self.last_content.as_deref() == Some(text.as_str()) {
                    return;
                }
                self.last_content = Some(text.clone());
                out.push(DecodedEvent::Content { text });
            }
            "toolUseEvent" => {
                let Some(parsed) = parse_payload::<ToolUsePayload>(event_type, payload) else {
                    return;
                };
                let arguments_chunk = match parsed.input {
                    None | Some(Value::Null) => String::new(),
                    Some(Value::String(fragment)) => fragment,
                    Some(other) => other.to_string(),
                };
                out.push(DecodedEvent::ToolCallFragment {
                    id: parsed.tool_use_id.filter(|id| !id.is_empty()),
                    name: parsed.name.filter(|name| !name.is_empty()),
                    arguments_chunk,
                    stop: parsed.stop,
                });
            }
            "meteringEvent" => {
                if let Some(parsed) = parse_payload::<MeteringPayload>(event_type, payload) {
                    out.push(DecodedEvent::Usage {
                        metering: parsed.usage,
                    });
                }
            }
            "contextUsageEvent" => {
                if let Some(parsed) = parse_payload::<ContextUsagePayload>(event_type, payload) {
                    out.push(DecodedEvent::ContextUsage {
                        percentage: parsed.percentage,
                    });
                }
            }
            other => {
                tracing::trace!(event_type = other, "dropping unrecognized event frame");
            }
        }
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_payload<T: serde::de::DeserializeOwned>(event_type: &str, payload: &[u8]) -> Option<T> {
    match serde_json::from_slice(payload) {
        Ok(parsed) => Some(parsed),
        Err(err) => {
            tracing::warn!(event_type, "skipping event with malformed payload: {err}");
            None
        }
    }
}

/// Frames without `:event-type` are classified by their leading JSON key.
fn classify_by_payload_shape(payload: &[u8]) -> &'static str {
    let key_start = payload.iter().position(|b| *b == b'"').map_or(0, |i| i + 1);
    let rest = &payload[key_start.min(payload.len())..];
    if rest.starts_with(b"content\"") || rest.starts_with(b"followupPrompt\"") {
        "assistantResponseEvent"
    } else if rest.starts_with(b"name\"")
        || rest.starts_with(b"toolUseId\"")
        || rest.starts_with(b"input\"")
        || rest.starts_with(b"stop\"")
    {
        "toolUseEvent"
    } else if rest.starts_with(b"usage\"") {
        "meteringEvent"
    } else if rest.starts_with(b"contextUsagePercentage\"") {
        "contextUsageEvent"
    } else {
        "unknown"
    }
}

#[inline]
fn read_u32_be(bytes: &[u8]) -> u32 {
    let mut buf = &bytes[..4];
    buf.get_u32()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content_frame(text: &str) -> Vec<u8> {
        let payload = serde_json::json!({ "content": text }).to_string();
        encode_event_frame("assistantResponseEvent", payload.as_bytes())
    }

    fn sample_stream() -> Vec<u8> {
        let mut bytes = content_frame("Hel");
        bytes.extend(content_frame("lo"));
        bytes.extend(encode_event_frame(
            "toolUseEvent",
            br#"{"name":"lookup","toolUseId":"tooluse_1","input":"{\"q\":"}"#,
        ));
        bytes.extend(encode_event_frame(
            "toolUseEvent",
            br#"{"name":"lookup","toolUseId":"tooluse_1","input":"\"x\"}"}"#,
        ));
        bytes.extend(encode_event_frame(
            "toolUseEvent",
            br#"{"name":"lookup","toolUseId":"tooluse_1","stop":true}"#,
        ));
        bytes.extend(encode_event_frame("meteringEvent", br#"{"usage":0.25}"#));
        bytes.extend(encode_event_frame(
            "contextUsageEvent",
            br#"{"contextUsagePercentage":12.5}"#,
        ));
        bytes
    }

    #[test]
    fn decodes_all_event_kinds() {
        let mut decoder = FrameDecoder::new();
        let events = decoder.feed(&sample_stream()).unwrap();
        assert_eq!(events.len(), 7);
        assert_eq!(
            events[0],
            DecodedEvent::Content {
                text: "Hel".into()
            }
        );
        assert_eq!(
            events[2],
            DecodedEvent::ToolCallFragment {
                id: Some("tooluse_1".into()),
                name: Some("lookup".into()),
                arguments_chunk: "{\"q\":".into(),
                stop: false,
            }
        );
        assert!(matches!(
            &events[4],
            DecodedEvent::ToolCallFragment { stop: true, arguments_chunk, .. } if arguments_chunk.is_empty()
        ));
        assert_eq!(
            events[5],
            DecodedEvent::Usage {
                metering: serde_json::json!(0.25)
            }
        );
        assert_eq!(events[6], DecodedEvent::ContextUsage { percentage: 12.5 });
        assert!(decoder.finish().is_ok());
    }

    #[test]
    fn split_at_every_boundary_matches_whole_feed() {
        let bytes = sample_stream();
        let whole = FrameDecoder::new().feed(&bytes).unwrap();

        for split in 0..=bytes.len() {
            let mut decoder = FrameDecoder::new();
            let mut events = decoder.feed(&bytes[..split]).unwrap();
            events.extend(decoder.feed(&bytes[split..]).unwrap());
            assert_eq!(events, whole, "split at {split}");
            assert_eq!(decoder.buffered_len(), 0);
        }
    }

    #[test]
    fn byte_by_byte_feed_matches_whole_feed() {
        let bytes = sample_stream();
        let whole = FrameDecoder::new().feed(&bytes).unwrap();
        let mut decoder = FrameDecoder::new();
        let mut events = Vec::new();
        for byte in &bytes {
            decoder.feed_into(std::slice::from_ref(byte), &mut events).unwrap();
        }
        assert_eq!(events, whole);
    }

    #[test]
    fn unknown_event_types_are_dropped() {
        let mut bytes = encode_event_frame("followupPromptEvent", br#"{"followupPrompt":{}}"#);
        bytes.extend(encode_event_frame("somethingNew", br#"{"x":1}"#));
        bytes.extend(content_frame("ok"));
        let events = FrameDecoder::new().feed(&bytes).unwrap();
        assert_eq!(events, vec![DecodedEvent::Content { text: "ok".into() }]);
    }

    #[test]
    fn repeated_content_delta_is_dropped() {
        let mut bytes = content_frame("same");
        bytes.extend(content_frame("same"));
        bytes.extend(content_frame("next"));
        let events = FrameDecoder::new().feed(&bytes).unwrap();
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn tool_input_object_is_serialized() {
        let bytes = encode_event_frame(
            "toolUseEvent",
            br#"{"name":"lookup","toolUseId":"t1","input":{"q":"x"},"stop":true}"#,
        );
        let events = FrameDecoder::new().feed(&bytes).unwrap();
        assert!(matches!(
            &events[0],
            DecodedEvent::ToolCallFragment { arguments_chunk, stop: true, .. } if arguments_chunk == r#"{"q":"x"}"#
        ));
    }

    #[test]
    fn missing_event_type_falls_back_to_payload_shape() {
        let bytes = encode_frame(&[(":message-type", "event")], br#"{"content":"hi"}"#);
        let events = FrameDecoder::new().feed(&bytes).unwrap();
        assert_eq!(events, vec![DecodedEvent::Content { text: "hi".into() }]);
    }

    #[test]
    fn oversized_length_prefix_is_an_error() {
        let mut bytes = content_frame("x");
        bytes[0..4].copy_from_slice(&u32::MAX.to_be_bytes());
        let err = FrameDecoder::new().feed(&bytes).unwrap_err();
        assert!(matches!(err, FrameDecodeError::InvalidLength { .. }));
    }

    #[test]
    fn undersized_length_prefix_is_an_error() {
        let mut bytes = content_frame("x");
        bytes[0..4].copy_from_slice(&4_u32.to_be_bytes());
        let err = FrameDecoder::new().feed(&bytes).unwrap_err();
        assert!(matches!(err, FrameDecodeError::InvalidLength { len: 4, .. }));
    }

    #[test]
    fn corrupted_payload_fails_message_checksum() {
        let mut bytes = content_frame("hello");
        let payload_byte = bytes.len() - 6;
        bytes[payload_byte] ^= 0xff;
        let err = FrameDecoder::new().feed(&bytes).unwrap_err();
        assert!(matches!(err, FrameDecodeError::MessageChecksum { .. }));
    }

    #[test]
    fn corrupted_prelude_fails_before_buffering_whole_frame() {
        let mut bytes = content_frame("hello");
        bytes[7] ^= 0x01;
        let err = FrameDecoder::new().feed(&bytes[..PRELUDE_LEN]).unwrap_err();
        assert!(matches!(err, FrameDecodeError::PreludeChecksum { .. }));
    }

    #[test]
    fn exception_frame_surfaces_message() {
        let bytes = encode_exception_frame("ThrottlingException", "slow down");
        let err = FrameDecoder::new().feed(&bytes).unwrap_err();
        match err {
            FrameDecodeError::UpstreamException { kind, message } => {
                assert_eq!(kind, "ThrottlingException");
                assert_eq!(message, "slow down");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn finish_reports_truncated_tail() {
        let bytes = content_frame("hello");
        let mut decoder = FrameDecoder::new();
        assert!(decoder.feed(&bytes[..bytes.len() - 3]).unwrap().is_empty());
        assert!(matches!(
            decoder.finish(),
            Err(FrameDecodeError::Truncated { .. })
        ));
    }

    #[test]
    fn malformed_payload_is_skipped() {
        let mut bytes = encode_event_frame("assistantResponseEvent", b"{not json");
        bytes.extend(content_frame("after"));
        let events = FrameDecoder::new().feed(&bytes).unwrap();
        assert_eq!(
            events,
            vec![DecodedEvent::Content {
                text: "after".into()
            }]
        );
    }
}
