use serde_json::Value;

use crate::error::GatewayError;
use crate::protocol::anthropic::{AnthropicMessage, AnthropicRequest, AnthropicTool};
use crate::protocol::openai_chat::{
    OpenAiChatRequest, OpenAiMessage, OpenAiTool, OpenAiToolCall, OpenAiToolCallFunction,
    OpenAiToolFunction,
};

/// Convert an Anthropic Messages request into the `OpenAI` chat shape the
/// upstream payload builder consumes.
///
/// Tool results stay as `tool_result` blocks inside a user message. Thinking
/// blocks are folded into text as `<thinking>..</thinking>` and images
/// become textual placeholders.
///
/// # Errors
///
/// Returns [`GatewayError::InvalidRequest`] when a message's `content` is
/// neither a string nor a block array.
pub fn anthropic_to_openai_request(
    request: AnthropicRequest,
) -> Result<OpenAiChatRequest, GatewayError> {
    let AnthropicRequest {
        model,
        max_tokens,
        system,
        messages,
        tools,
        tool_choice,
        stream,
        temperature,
        top_p,
        stop_sequences,
        extra: _,
    } = request;

    let mut out = Vec::with_capacity(messages.len() + 1);
    if let Some(system_text) = system.as_ref().map(system_prompt_text) {
        if !system_text.is_empty() {
            out.push(OpenAiMessage::text("system", system_text));
        }
    }

    for (position, message) in messages.into_iter().enumerate() {
        out.push(convert_message(message, position)?);
    }

    Ok(OpenAiChatRequest {
        model,
        messages: out,
        tools: tools.map(|tools| tools.into_iter().map(convert_tool).collect()),
        tool_choice,
        stream,
        temperature,
        max_tokens,
        top_p,
        stop: stop_sequences.map(Value::from),
        extra: serde_json::Map::new(),
    })
}

fn system_prompt_text(system: &Value) -> String {
    match system {
        Value::String(text) => text.clone(),
        Value::Array(blocks) => blocks
            .iter()
            .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|block| block.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

fn convert_message(
    message: AnthropicMessage,
    position: usize,
) -> Result<OpenAiMessage, GatewayError> {
    let AnthropicMessage { role, content } = message;
    let blocks = match content {
        Value::String(text) => return Ok(OpenAiMessage::text(&role, text)),
        Value::Array(blocks) => blocks,
        other => {
            return Err(GatewayError::InvalidRequest(format!(
                "messages[{position}].content must be a string or an array, got {}",
                json_kind(&other)
            )))
        }
    };

    let mut text_parts: Vec<String> = Vec::new();
    let mut tool_calls = Vec::new();
    let mut tool_results = Vec::new();

    for block in blocks {
        match block.get("type").and_then(Value::as_str) {
            Some("text") => {
                if let Some(text) = block.get("text").and_then(Value::as_str) {
                    if !text.is_empty() {
                        text_parts.push(text.to_string());
                    }
                }
            }
            Some("tool_use") => tool_calls.push(OpenAiToolCall {
                id: str_field(&block, "id"),
                type_: "function".to_string(),
                function: OpenAiToolCallFunction {
                    name: str_field(&block, "name"),
                    arguments: block
                        .get("input")
                        .filter(|input| !input.is_null())
                        .map_or_else(|| "{}".to_string(), Value::to_string),
                },
            }),
            Some("tool_result") => tool_results.push(block),
            Some("thinking") => {
                let thinking = block.get("thinking").and_then(Value::as_str).unwrap_or("");
                if !thinking.is_empty() {
                    text_parts.push(format!("<thinking>{thinking}</thinking>"));
                }
            }
            Some("image") => {
                if let Some(placeholder) = image_placeholder(&block) {
                    text_parts.push(placeholder);
                }
            }
            other => tracing::debug!(block_type = ?other, "dropping unsupported content block"),
        }
    }

    if !tool_results.is_empty() {
        return Ok(OpenAiMessage {
            role: "user".to_string(),
            content: Some(Value::Array(tool_results)),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        });
    }

    let text = text_parts.join("\n");
    Ok(OpenAiMessage {
        role,
        content: (!text.is_empty()).then_some(Value::String(text)),
        name: None,
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        tool_call_id: None,
    })
}

fn image_placeholder(block: &Value) -> Option<String> {
    let source = block.get("source")?;
    match source.get("type").and_then(Value::as_str) {
        Some("base64") => {
            let media_type = source
                .get("media_type")
                .and_then(Value::as_str)
                .unwrap_or("image");
            Some(format!("[Image: {media_type}]"))
        }
        Some("url") => {
            let url = source.get("url").and_then(Value::as_str).unwrap_or("");
            Some(format!("[Image URL: {url}]"))
        }
        _ => None,
    }
}

fn convert_tool(tool: AnthropicTool) -> OpenAiTool {
    OpenAiTool {
        type_: "function".to_string(),
        function: OpenAiToolFunction {
            name: tool.name,
            description: tool.description,
            parameters: (!tool.input_schema.is_null()).then_some(tool.input_schema),
        },
    }
}

fn str_field(block: &Value, key: &str) -> String {
    block
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(body: Value) -> AnthropicRequest {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn system_blocks_are_joined() {
        let converted = anthropic_to_openai_request(request(json!({
            "model": "claude-sonnet-4",
            "max_tokens": 64,
            "system": [
                {"type": "text", "text": "Be brief."},
                {"type": "text", "text": "Be kind."}
            ],
            "messages": [{"role": "user", "content": "hi"}]
        })))
        .unwrap();
        assert_eq!(converted.messages[0].role, "system");
        assert_eq!(
            converted.messages[0].content,
            Some(json!("Be brief.\nBe kind."))
        );
        assert_eq!(converted.messages[1].content, Some(json!("hi")));
        assert_eq!(converted.max_tokens, Some(64));
    }

    #[test]
    fn tool_use_becomes_tool_calls() {
        let converted = anthropic_to_openai_request(request(json!({
            "model": "m",
            "messages": [{
                "role": "assistant",
                "content": [
                    {"type": "text", "text": "Looking."},
                    {"type": "tool_use", "id": "toolu_1", "name": "lookup", "input": {"q": "x"}}
                ]
            }]
        })))
        .unwrap();
        let message = &converted.messages[0];
        assert_eq!(message.content, Some(json!("Looking.")));
        let calls = message.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].id, "toolu_1");
        assert_eq!(calls[0].function.name, "lookup");
        assert_eq!(calls[0].function.arguments, r#"{"q":"x"}"#);
    }

    #[test]
    fn tool_results_stay_as_blocks_in_user_message() {
        let converted = anthropic_to_openai_request(request(json!({
            "model": "m",
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "tool_result", "tool_use_id": "toolu_1", "content": "42"}
                ]
            }]
        })))
        .unwrap();
        let message = &converted.messages[0];
        assert_eq!(message.role, "user");
        assert_eq!(
            message.content.as_ref().unwrap()[0]["tool_use_id"],
            "toolu_1"
        );
    }

    #[test]
    fn thinking_and_images_become_text() {
        let converted = anthropic_to_openai_request(request(json!({
            "model": "m",
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "thinking", "thinking": "hmm"},
                    {"type": "image", "source": {"type": "base64", "media_type": "image/png", "data": "AAAA"}},
                    {"type": "image", "source": {"type": "url", "url": "https://example.com/a.png"}}
                ]
            }]
        })))
        .unwrap();
        assert_eq!(
            converted.messages[0].content,
            Some(json!(
                "<thinking>hmm</thinking>\n[Image: image/png]\n[Image URL: https://example.com/a.png]"
            ))
        );
    }

    #[test]
    fn tools_and_stop_sequences_carry_over() {
        let converted = anthropic_to_openai_request(request(json!({
            "model": "m",
            "stream": true,
            "stop_sequences": ["END"],
            "messages": [{"role": "user", "content": "hi"}],
            "tools": [{"name": "lookup", "description": "Find", "input_schema": {"type": "object"}}]
        })))
        .unwrap();
        assert!(converted.is_stream());
        assert_eq!(converted.stop, Some(json!(["END"])));
        let tool = &converted.tools.unwrap()[0];
        assert_eq!(tool.function.name, "lookup");
        assert_eq!(tool.function.parameters, Some(json!({"type": "object"})));
    }

    #[test]
    fn non_textual_content_is_rejected() {
        let err = anthropic_to_openai_request(request(json!({
            "model": "m",
            "messages": [{"role": "user", "content": 7}]
        })))
        .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidRequest(_)));
        assert!(err.to_string().contains("messages[0].content"));
    }
}
