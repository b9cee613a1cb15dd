use crate::error::GatewayError;
use crate::stream::{ProtocolEmitter, StreamOutcome};
use crate::toolcall::ToolCall;
use crate::util::{
    next_call_id, push_json_string_escaped, push_u64_decimal, random_hex_id, unix_now_secs,
};

use super::OpenAiUsage;

const DONE_FRAME: &str = "data: [DONE]\n\n";

/// `chat.completion.chunk` SSE writer for one response.
///
/// Content deltas are written as they arrive; the first one carries
/// `role: "assistant"`. At the end, tool calls (if any) go out as one chunk,
/// then a single terminal chunk with `finish_reason` and `usage`, then
/// `[DONE]`.
pub struct OpenAiStreamEmitter {
    id: String,
    model: String,
    created: u64,
    first_chunk_sent: bool,
    finished: bool,
}

impl OpenAiStreamEmitter {
    #[must_use]
    pub fn new(model: &str) -> Self {
        Self::with_id(random_hex_id("chatcmpl-", 24), model, unix_now_secs())
    }

    #[must_use]
    pub fn with_id(id: String, model: &str, created: u64) -> Self {
        Self {
            id,
            model: model.to_string(),
            created,
            first_chunk_sent: false,
            finished: false,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    fn push_chunk_prefix(&self, out: &mut String) {
        out.push_str("data: {\"id\":");
        push_json_string_escaped(out, &self.id);
        out.push_str(",\"object\":\"chat.completion.chunk\",\"created\":");
        push_u64_decimal(out, self.created);
        out.push_str(",\"model\":");
        push_json_string_escaped(out, &self.model);
    }

    fn render_chunk(&self, body: &serde_json::Value) -> String {
        let mut chunk = serde_json::json!({
            "id": self.id,
            "object": "chat.completion.chunk",
            "created": self.created,
            "model": self.model,
        });
        if let (Some(chunk), serde_json::Value::Object(body)) = (chunk.as_object_mut(), body) {
            for (key, value) in body {
                chunk.insert(key.clone(), value.clone());
            }
        }
        format!("data: {chunk}\n\n")
    }
}

impl ProtocolEmitter for OpenAiStreamEmitter {
    fn start(&mut self) -> Option<String> {
        None
    }

    fn content(&mut self, text: &str) -> String {
        let mut out = String::with_capacity(160 + self.id.len() + self.model.len() + text.len());
        self.push_chunk_prefix(&mut out);
        out.push_str(",\"choices\":[{\"index\":0,\"delta\":{");
        if !self.first_chunk_sent {
            out.push_str("\"role\":\"assistant\",");
            self.first_chunk_sent = true;
        }
        out.push_str("\"content\":");
        push_json_string_escaped(&mut out, text);
        out.push_str("},\"finish_reason\":null}]}\n\n");
        out
    }

    fn finish(&mut self, outcome: &StreamOutcome) -> String {
        if self.finished {
            return String::new();
        }
        self.finished = true;

        if outcome.upstream_empty {
            tracing::debug!(model = %self.model, "empty response from upstream");
            return DONE_FRAME.to_string();
        }

        let mut out = String::new();
        if !outcome.tool_calls.is_empty() {
            let calls: Vec<serde_json::Value> = outcome
                .tool_calls
                .iter()
                .enumerate()
                .map(|(index, call)| stream_tool_call_json(index, call))
                .collect();
            out.push_str(&self.render_chunk(&serde_json::json!({
                "choices": [{
                    "index": 0,
                    "delta": { "tool_calls": calls },
                    "finish_reason": null,
                }]
            })));
        }

        let usage = usage_from_outcome(outcome);
        out.push_str(&self.render_chunk(&serde_json::json!({
            "choices": [{
                "index": 0,
                "delta": {},
                "finish_reason": finish_reason(outcome),
            }],
            "usage": usage,
        })));
        out.push_str(DONE_FRAME);
        out
    }

    fn error(&mut self, err: &GatewayError) -> Option<String> {
        // No in-band error convention: the stream ends after the last good chunk.
        tracing::error!(model = %self.model, "OpenAI stream aborted: {err}");
        self.finished = true;
        None
    }
}

fn stream_tool_call_json(index: usize, call: &ToolCall) -> serde_json::Value {
    tracing::debug!(
        index,
        tool = %call.name,
        args_len = call.arguments.len(),
        "emitting tool call"
    );
    serde_json::json!({
        "index": index,
        "id": call.id.clone().unwrap_or_else(next_call_id),
        "type": "function",
        "function": {
            "name": call.name,
            "arguments": call.arguments,
        }
    })
}

pub(crate) fn finish_reason(outcome: &StreamOutcome) -> &'static str {
    if outcome.tool_calls.is_empty() {
        "stop"
    } else {
        "tool_calls"
    }
}

pub(crate) fn usage_from_outcome(outcome: &StreamOutcome) -> OpenAiUsage {
    OpenAiUsage {
        prompt_tokens: outcome.usage.prompt_tokens,
        completion_tokens: outcome.usage.completion_tokens,
        total_tokens: outcome.usage.total_tokens,
        credits_used: outcome.metering.clone(),
    }
}
