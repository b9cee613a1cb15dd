use std::time::Duration;

use tracing::info;

use crate::protocol::openai_chat::{OpenAiMessage, OpenAiTool};
use crate::usage::UsageEstimate;

/// Estimate the number of tokens in `text`.
///
/// Uses a lightweight heuristic (`bytes / 4`) to avoid loading model BPE tables.
#[must_use]
pub fn count_tokens(text: &str) -> u64 {
    (text.len() as u64).div_ceil(4)
}

/// Estimate the tokens of a message list: text content, tool results and
/// the arguments of assistant tool calls.
#[must_use]
pub fn count_message_tokens(messages: &[OpenAiMessage]) -> u64 {
    let mut total: u64 = 0;
    for msg in messages {
        if let Some(content) = msg.content.as_ref() {
            total += count_content_tokens(content);
        }
        for call in msg.tool_calls.iter().flatten() {
            total += count_tokens(&call.function.name);
            total += count_tokens(&call.function.arguments);
        }
    }
    total
}

fn count_content_tokens(content: &serde_json::Value) -> u64 {
    match content {
        serde_json::Value::String(text) => count_tokens(text),
        serde_json::Value::Array(parts) => parts
            .iter()
            .filter_map(|part| part.get("text").and_then(serde_json::Value::as_str))
            .map(count_tokens)
            .sum(),
        serde_json::Value::Null => 0,
        other => count_tokens(&other.to_string()),
    }
}

/// Estimate the tokens of tool definitions (name, description, schema).
#[must_use]
pub fn count_tool_tokens(tools: &[OpenAiTool]) -> u64 {
    let mut total: u64 = 0;
    for tool in tools {
        total += count_tokens(&tool.function.name);
        if let Some(ref desc) = tool.function.description {
            total += count_tokens(desc);
        }
        if let Some(ref parameters) = tool.function.parameters {
            if let Ok(serialized) = serde_json::to_string(parameters) {
                total += count_tokens(&serialized);
            }
        }
    }
    total
}

/// Local prompt estimate for a request: messages plus tool definitions.
#[must_use]
pub fn count_request_tokens(messages: &[OpenAiMessage], tools: Option<&[OpenAiTool]>) -> u64 {
    count_message_tokens(messages) + tools.map_or(0, count_tool_tokens)
}

/// Log token usage for a completed request at INFO level.
pub fn log_request_usage(model: &str, usage: &UsageEstimate, duration: Duration) {
    info!(
        model = model,
        prompt_tokens = usage.prompt_tokens,
        prompt_source = usage.prompt_source.as_str(),
        completion_tokens = usage.completion_tokens,
        total_tokens = usage.total_tokens,
        total_source = usage.total_source.as_str(),
        duration_seconds = duration.as_secs_f64(),
        "request completed"
    );
}
