use super::header::push_string_header;
use super::{PRELUDE_LEN, TRAILER_LEN};

/// Encode one frame carrying string-typed headers.
#[must_use]
pub fn encode_frame(headers: &[(&str, &str)], payload: &[u8]) -> Vec<u8> {
    let mut header_block = Vec::with_capacity(64);
    for (name, value) in headers {
        push_string_header(&mut header_block, name, value);
    }

    let total_len = PRELUDE_LEN + header_block.len() + payload.len() + TRAILER_LEN;
    let total_len_u32 = u32::try_from(total_len).unwrap_or(u32::MAX);
    let headers_len_u32 = u32::try_from(header_block.len()).unwrap_or(u32::MAX);

    let mut frame = Vec::with_capacity(total_len);
    frame.extend_from_slice(&total_len_u32.to_be_bytes());
    frame.extend_from_slice(&headers_len_u32.to_be_bytes());
    let prelude_crc = crc32fast::hash(&frame[..8]);
    frame.extend_from_slice(&prelude_crc.to_be_bytes());
    frame.extend_from_slice(&header_block);
    frame.extend_from_slice(payload);
    let message_crc = crc32fast::hash(&frame);
    frame.extend_from_slice(&message_crc.to_be_bytes());
    frame
}

/// Encode an `event` frame the way the upstream does, with a JSON payload.
#[must_use]
pub fn encode_event_frame(event_type: &str, payload: &[u8]) -> Vec<u8> {
    encode_frame(
        &[
            (":event-type", event_type),
            (":content-type", "application/json"),
            (":message-type", "event"),
        ],
        payload,
    )
}

/// Encode an `exception` frame carrying a JSON `{"message": ...}` payload.
#[must_use]
pub fn encode_exception_frame(exception_type: &str, message: &str) -> Vec<u8> {
    let payload = serde_json::json!({ "message": message }).to_string();
    encode_frame(
        &[
            (":exception-type", exception_type),
            (":content-type", "application/json"),
            (":message-type", "exception"),
        ],
        payload.as_bytes(),
    )
}
