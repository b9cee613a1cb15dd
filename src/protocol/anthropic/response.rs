use crate::stream::StreamOutcome;
use crate::util::random_hex_id;

use super::{
    stop_reason, tool_use_id, AnthropicContentBlock, AnthropicResponse, AnthropicUsage,
};

/// Build a Messages API `message` from a fully collected upstream response.
#[must_use]
pub fn build_message(model: &str, outcome: &StreamOutcome) -> AnthropicResponse {
    let mut content = Vec::with_capacity(1 + outcome.tool_calls.len());
    if !outcome.content.is_empty() {
        content.push(AnthropicContentBlock::Text {
            text: outcome.content.clone(),
        });
    }
    for call in &outcome.tool_calls {
        content.push(AnthropicContentBlock::ToolUse {
            id: tool_use_id(call),
            name: call.name.clone(),
            input: call.arguments_value(),
        });
    }

    AnthropicResponse {
        id: random_hex_id("msg_", 24),
        type_: "message".to_string(),
        role: "assistant".to_string(),
        content,
        model: model.to_string(),
        stop_reason: Some(stop_reason(!outcome.tool_calls.is_empty()).to_string()),
        stop_sequence: None,
        usage: AnthropicUsage {
            input_tokens: outcome.usage.prompt_tokens,
            output_tokens: outcome.usage.completion_tokens,
        },
    }
}
