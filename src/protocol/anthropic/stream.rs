use crate::error::GatewayError;
use crate::protocol::error_shapes::anthropic_error_event;
use crate::stream::{ProtocolEmitter, StreamOutcome};
use crate::util::{push_json_string_escaped, push_u64_decimal, push_usize_decimal, random_hex_id};

use super::{stop_reason, tool_use_id};

/// Anthropic `message_*` SSE writer for one response.
///
/// `message_start` carries the locally estimated `input_tokens` so the
/// first event already has a usage hint. The text block (index 0) opens on
/// the first content delta and is closed before any `tool_use` block opens.
pub struct AnthropicStreamEmitter {
    id: String,
    model: String,
    input_tokens: u64,
    text_block_open: bool,
    next_index: usize,
    finished: bool,
}

impl AnthropicStreamEmitter {
    #[must_use]
    pub fn new(model: &str, input_tokens: u64) -> Self {
        Self::with_id(random_hex_id("msg_", 24), model, input_tokens)
    }

    #[must_use]
    pub fn with_id(id: String, model: &str, input_tokens: u64) -> Self {
        Self {
            id,
            model: model.to_string(),
            input_tokens,
            text_block_open: false,
            next_index: 0,
            finished: false,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    fn close_text_block(&mut self, out: &mut String) {
        if !self.text_block_open {
            return;
        }
        self.text_block_open = false;
        push_block_stop(out, 0);
    }
}

impl ProtocolEmitter for AnthropicStreamEmitter {
    fn start(&mut self) -> Option<String> {
        let message_start = serde_json::json!({
            "type": "message_start",
            "message": {
                "id": self.id,
                "type": "message",
                "role": "assistant",
                "content": [],
                "model": self.model,
                "stop_reason": null,
                "stop_sequence": null,
                "usage": {
                    "input_tokens": self.input_tokens,
                    "output_tokens": 0,
                    "cache_creation_input_tokens": 0,
                    "cache_read_input_tokens": 0,
                }
            }
        });
        Some(format!("event: message_start\ndata: {message_start}\n\n"))
    }

    fn content(&mut self, text: &str) -> String {
        let mut out = String::with_capacity(160 + text.len());
        if !self.text_block_open && self.next_index == 0 {
            self.text_block_open = true;
            self.next_index = 1;
            out.push_str(
                "event: content_block_start\ndata: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n\n",
            );
        }
        out.push_str("event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":");
        push_json_string_escaped(&mut out, text);
        out.push_str("}}\n\n");
        out
    }

    fn finish(&mut self, outcome: &StreamOutcome) -> String {
        if self.finished {
            return String::new();
        }
        self.finished = true;

        let mut out = String::new();
        self.close_text_block(&mut out);

        for call in &outcome.tool_calls {
            let index = self.next_index;
            self.next_index += 1;
            let id = tool_use_id(call);
            tracing::debug!(index, tool = %call.name, "emitting tool_use block");

            let block_start = serde_json::json!({
                "type": "content_block_start",
                "index": index,
                "content_block": {
                    "type": "tool_use",
                    "id": id,
                    "name": call.name,
                    "input": {},
                }
            });
            out.push_str("event: content_block_start\ndata: ");
            out.push_str(&block_start.to_string());
            out.push_str("\n\n");

            if call.arguments != "{}" {
                out.push_str("event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":");
                push_usize_decimal(&mut out, index);
                out.push_str(",\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":");
                push_json_string_escaped(&mut out, &call.arguments);
                out.push_str("}}\n\n");
            }

            push_block_stop(&mut out, index);
        }

        out.push_str("event: message_delta\ndata: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"");
        out.push_str(stop_reason(!outcome.tool_calls.is_empty()));
        out.push_str("\",\"stop_sequence\":null},\"usage\":{\"output_tokens\":");
        push_u64_decimal(&mut out, outcome.usage.completion_tokens);
        out.push_str("}}\n\n");
        out.push_str("event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n");
        out
    }

    fn error(&mut self, err: &GatewayError) -> Option<String> {
        tracing::error!(model = %self.model, "Anthropic stream aborted: {err}");
        self.finished = true;
        Some(anthropic_error_event(&err.client_message()))
    }
}

fn push_block_stop(out: &mut String, index: usize) {
    out.push_str("event: content_block_stop\ndata: {\"type\":\"content_block_stop\",\"index\":");
    push_usize_decimal(out, index);
    out.push_str("}\n\n");
}
