//! Kiro `generateAssistantResponse` request building.

pub mod models;

use serde_json::{json, Map, Value};

use crate::error::GatewayError;
use crate::protocol::openai_chat::{OpenAiChatRequest, OpenAiMessage, OpenAiTool, OpenAiToolCall};

const ORIGIN: &str = "AI_EDITOR";
const CONTINUE_PROMPT: &str = "Continue";
const TOOL_DOC_HEADER: &str = "\n\n---\n# Tool Documentation\nThe following tools have detailed documentation that couldn't fit in the tool definition.\n\n";

/// Everything besides the chat request that goes into an upstream payload.
pub struct PayloadContext<'a> {
    pub conversation_id: &'a str,
    pub model_id: &'a str,
    pub profile_arn: Option<&'a str>,
    /// Descriptions longer than this move into the system prompt. 0 disables.
    pub tool_description_max_length: usize,
}

/// Conversation message after tool results are folded into user turns.
struct Turn {
    role: String,
    content: Value,
    tool_calls: Vec<OpenAiToolCall>,
}

/// Build the upstream request body for an `OpenAI`-shaped chat request.
///
/// # Errors
///
/// Returns [`GatewayError::InvalidRequest`] when the request holds no
/// non-system message.
pub fn build_kiro_payload(
    request: &OpenAiChatRequest,
    ctx: &PayloadContext<'_>,
) -> Result<Value, GatewayError> {
    let (tools, tool_documentation) =
        split_long_tool_descriptions(request.tools.as_deref(), ctx.tool_description_max_length);

    let mut system_prompt = String::new();
    let mut conversation = Vec::with_capacity(request.messages.len());
    for message in &request.messages {
        if message.role == "system" {
            system_prompt.push_str(&extract_text_content(message.content.as_ref()));
            system_prompt.push('\n');
        } else {
            conversation.push(message);
        }
    }
    let mut system_prompt = system_prompt.trim().to_string();
    if !tool_documentation.is_empty() {
        if system_prompt.is_empty() {
            system_prompt = tool_documentation.trim().to_string();
        } else {
            system_prompt.push_str(&tool_documentation);
        }
    }

    let mut turns = merge_adjacent_turns(fold_tool_messages(&conversation));
    let Some(current) = turns.pop() else {
        return Err(GatewayError::InvalidRequest(
            "No messages to send".to_string(),
        ));
    };

    if !system_prompt.is_empty() {
        if let Some(first) = turns.first_mut().filter(|turn| turn.role == "user") {
            let original = extract_text_content(Some(&first.content));
            first.content = Value::String(format!("{system_prompt}\n\n{original}"));
        }
    }

    let mut history = build_history(&turns, ctx.model_id);

    let mut current_content = extract_text_content(Some(&current.content));
    if !system_prompt.is_empty() && history.is_empty() {
        current_content = format!("{system_prompt}\n\n{current_content}");
    }
    if current.role == "assistant" {
        history.push(json!({
            "assistantResponseMessage": { "content": current_content }
        }));
        current_content = CONTINUE_PROMPT.to_string();
    }
    if current_content.is_empty() {
        current_content = CONTINUE_PROMPT.to_string();
    }

    let mut user_input = Map::new();
    user_input.insert("content".into(), Value::String(current_content));
    user_input.insert("modelId".into(), Value::String(ctx.model_id.to_string()));
    user_input.insert("origin".into(), Value::String(ORIGIN.to_string()));

    let mut input_context = Map::new();
    if !tools.is_empty() {
        let specs: Vec<Value> = tools.iter().map(tool_specification).collect();
        input_context.insert("tools".into(), Value::Array(specs));
    }
    let tool_results = extract_tool_results(&current.content);
    if !tool_results.is_empty() {
        input_context.insert("toolResults".into(), Value::Array(tool_results));
    }
    if !input_context.is_empty() {
        user_input.insert(
            "userInputMessageContext".into(),
            Value::Object(input_context),
        );
    }

    let mut state = Map::new();
    state.insert("chatTriggerType".into(), Value::String("MANUAL".into()));
    state.insert(
        "conversationId".into(),
        Value::String(ctx.conversation_id.to_string()),
    );
    state.insert(
        "currentMessage".into(),
        json!({ "userInputMessage": Value::Object(user_input) }),
    );
    if !history.is_empty() {
        state.insert("history".into(), Value::Array(history));
    }

    let mut payload = Map::new();
    payload.insert("conversationState".into(), Value::Object(state));
    if let Some(arn) = ctx.profile_arn.filter(|arn| !arn.is_empty()) {
        payload.insert("profileArn".into(), Value::String(arn.to_string()));
    }
    Ok(Value::Object(payload))
}

/// Plain text of a message `content`: strings as-is, arrays by joining the
/// `text` of their parts.
#[must_use]
pub fn extract_text_content(content: Option<&Value>) -> String {
    match content {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(parts)) => {
            let mut out = String::new();
            for part in parts {
                match part {
                    Value::String(text) => out.push_str(text),
                    Value::Object(obj) => {
                        if let Some(text) = obj.get("text").and_then(Value::as_str) {
                            out.push_str(text);
                        }
                    }
                    _ => {}
                }
            }
            out
        }
        Some(other) => other.to_string(),
    }
}

fn split_long_tool_descriptions(
    tools: Option<&[OpenAiTool]>,
    max_len: usize,
) -> (Vec<OpenAiTool>, String) {
    let Some(tools) = tools.filter(|tools| !tools.is_empty()) else {
        return (Vec::new(), String::new());
    };
    if max_len == 0 {
        return (tools.to_vec(), String::new());
    }

    let mut docs = Vec::new();
    let mut processed = Vec::with_capacity(tools.len());
    for tool in tools {
        let description = tool.function.description.as_deref().unwrap_or("");
        if tool.type_ != "function" || description.chars().count() <= max_len {
            processed.push(tool.clone());
            continue;
        }

        let name = &tool.function.name;
        tracing::debug!(
            tool = %name,
            len = description.len(),
            max_len,
            "moving long tool description into the system prompt"
        );
        docs.push(format!("## Tool: {name}\n\n{description}"));
        let mut short = tool.clone();
        short.function.description = Some(format!(
            "[Full documentation in system prompt under '## Tool: {name}']"
        ));
        processed.push(short);
    }

    let documentation = if docs.is_empty() {
        String::new()
    } else {
        format!("{TOOL_DOC_HEADER}{}", docs.join("\n\n---\n\n"))
    };
    (processed, documentation)
}

fn fold_tool_messages(messages: &[&OpenAiMessage]) -> Vec<Turn> {
    let mut turns = Vec::with_capacity(messages.len());
    let mut pending_results: Vec<Value> = Vec::new();

    for message in messages {
        if message.role == "tool" {
            let mut text = extract_text_content(message.content.as_ref());
            if text.is_empty() {
                text = "(empty result)".to_string();
            }
            pending_results.push(json!({
                "type": "tool_result",
                "tool_use_id": message.tool_call_id.as_deref().unwrap_or(""),
                "content": text,
            }));
            continue;
        }
        if !pending_results.is_empty() {
            turns.push(Turn {
                role: "user".to_string(),
                content: Value::Array(std::mem::take(&mut pending_results)),
                tool_calls: Vec::new(),
            });
        }
        turns.push(Turn {
            role: message.role.clone(),
            content: message.content.clone().unwrap_or(Value::Null),
            tool_calls: message.tool_calls.clone().unwrap_or_default(),
        });
    }
    if !pending_results.is_empty() {
        turns.push(Turn {
            role: "user".to_string(),
            content: Value::Array(pending_results),
            tool_calls: Vec::new(),
        });
    }
    turns
}

fn merge_adjacent_turns(turns: Vec<Turn>) -> Vec<Turn> {
    let mut merged: Vec<Turn> = Vec::with_capacity(turns.len());
    for turn in turns {
        let Some(last) = merged.last_mut().filter(|last| last.role == turn.role) else {
            merged.push(turn);
            continue;
        };

        let previous = std::mem::take(&mut last.content);
        last.content = match (previous, turn.content) {
            (Value::Array(mut head), Value::Array(tail)) => {
                head.extend(tail);
                Value::Array(head)
            }
            (Value::Array(mut head), tail) => {
                head.push(json!({ "type": "text", "text": extract_text_content(Some(&tail)) }));
                Value::Array(head)
            }
            (head, Value::Array(tail)) => {
                let mut parts = Vec::with_capacity(tail.len() + 1);
                parts.push(json!({ "type": "text", "text": extract_text_content(Some(&head)) }));
                parts.extend(tail);
                Value::Array(parts)
            }
            (head, tail) => Value::String(format!(
                "{}\n{}",
                extract_text_content(Some(&head)),
                extract_text_content(Some(&tail))
            )),
        };
        if turn.role == "assistant" && !turn.tool_calls.is_empty() {
            last.tool_calls.extend(turn.tool_calls);
            tracing::debug!(total = last.tool_calls.len(), "merged assistant tool calls");
        }
    }
    merged
}

fn build_history(turns: &[Turn], model_id: &str) -> Vec<Value> {
    let mut history = Vec::with_capacity(turns.len() + 1);
    for turn in turns {
        match turn.role.as_str() {
            "user" => {
                let mut user_input = Map::new();
                user_input.insert(
                    "content".into(),
                    Value::String(extract_text_content(Some(&turn.content))),
                );
                user_input.insert("modelId".into(), Value::String(model_id.to_string()));
                user_input.insert("origin".into(), Value::String(ORIGIN.to_string()));
                let tool_results = extract_tool_results(&turn.content);
                if !tool_results.is_empty() {
                    user_input.insert(
                        "userInputMessageContext".into(),
                        json!({ "toolResults": tool_results }),
                    );
                }
                history.push(json!({ "userInputMessage": Value::Object(user_input) }));
            }
            "assistant" => {
                let mut response = Map::new();
                response.insert(
                    "content".into(),
                    Value::String(extract_text_content(Some(&turn.content))),
                );
                let tool_uses = extract_tool_uses(turn);
                if !tool_uses.is_empty() {
                    response.insert("toolUses".into(), Value::Array(tool_uses));
                }
                history.push(json!({ "assistantResponseMessage": Value::Object(response) }));
            }
            other => tracing::debug!(role = other, "skipping message with unsupported role"),
        }
    }
    history
}

fn extract_tool_results(content: &Value) -> Vec<Value> {
    let Value::Array(parts) = content else {
        return Vec::new();
    };
    parts
        .iter()
        .filter(|part| part.get("type").and_then(Value::as_str) == Some("tool_result"))
        .map(|part| {
            json!({
                "content": [{ "text": extract_text_content(part.get("content")) }],
                "status": "success",
                "toolUseId": part.get("tool_use_id").and_then(Value::as_str).unwrap_or(""),
            })
        })
        .collect()
}

fn extract_tool_uses(turn: &Turn) -> Vec<Value> {
    let mut uses = Vec::new();
    for call in &turn.tool_calls {
        let raw = if call.function.arguments.trim().is_empty() {
            "{}"
        } else {
            call.function.arguments.as_str()
        };
        let input = serde_json::from_str::<Value>(raw).unwrap_or_else(|err| {
            tracing::warn!(tool = %call.function.name, "failed to parse tool call arguments: {err}");
            Value::Object(Map::new())
        });
        uses.push(json!({
            "name": call.function.name,
            "input": input,
            "toolUseId": call.id,
        }));
    }

    if let Value::Array(parts) = &turn.content {
        for part in parts {
            if part.get("type").and_then(Value::as_str) != Some("tool_use") {
                continue;
            }
            uses.push(json!({
                "name": part.get("name").and_then(Value::as_str).unwrap_or(""),
                "input": part.get("input").cloned().unwrap_or_else(|| json!({})),
                "toolUseId": part.get("id").and_then(Value::as_str).unwrap_or(""),
            }));
        }
    }
    uses
}

fn tool_specification(tool: &OpenAiTool) -> Value {
    json!({
        "toolSpecification": {
            "name": tool.function.name,
            "description": tool.function.description.as_deref().unwrap_or(""),
            "inputSchema": {
                "json": tool.function.parameters.clone().unwrap_or_else(|| json!({})),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> PayloadContext<'static> {
        PayloadContext {
            conversation_id: "conv-1",
            model_id: "CLAUDE_SONNET_4_20250514_V1_0",
            profile_arn: Some("arn:aws:codewhisperer:us-east-1:1:profile/P"),
            tool_description_max_length: 40,
        }
    }

    fn request(body: Value) -> OpenAiChatRequest {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn single_user_message_with_system_prompt() {
        let payload = build_kiro_payload(
            &request(json!({
                "model": "claude-sonnet-4",
                "messages": [
                    {"role": "system", "content": "Be brief."},
                    {"role": "user", "content": "Hello"}
                ]
            })),
            &ctx(),
        )
        .unwrap();
        let state = &payload["conversationState"];
        assert_eq!(state["chatTriggerType"], "MANUAL");
        assert_eq!(state["conversationId"], "conv-1");
        assert!(state.get("history").is_none());
        let input = &state["currentMessage"]["userInputMessage"];
        assert_eq!(input["content"], "Be brief.\n\nHello");
        assert_eq!(input["modelId"], "CLAUDE_SONNET_4_20250514_V1_0");
        assert_eq!(input["origin"], "AI_EDITOR");
        assert_eq!(
            payload["profileArn"],
            "arn:aws:codewhisperer:us-east-1:1:profile/P"
        );
    }

    #[test]
    fn tool_round_trip_builds_history_and_results() {
        let payload = build_kiro_payload(
            &request(json!({
                "model": "m",
                "messages": [
                    {"role": "system", "content": "sys"},
                    {"role": "user", "content": "Find x"},
                    {"role": "assistant", "content": null, "tool_calls": [
                        {"id": "call_1", "type": "function",
                         "function": {"name": "lookup", "arguments": "{\"q\":\"x\"}"}}
                    ]},
                    {"role": "tool", "tool_call_id": "call_1", "content": "42"}
                ]
            })),
            &ctx(),
        )
        .unwrap();
        let state = &payload["conversationState"];
        let history = state["history"].as_array().unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0]["userInputMessage"]["content"], "sys\n\nFind x");
        let tool_use = &history[1]["assistantResponseMessage"]["toolUses"][0];
        assert_eq!(tool_use["name"], "lookup");
        assert_eq!(tool_use["input"]["q"], "x");
        assert_eq!(tool_use["toolUseId"], "call_1");

        let input = &state["currentMessage"]["userInputMessage"];
        assert_eq!(input["content"], "Continue");
        let result = &input["userInputMessageContext"]["toolResults"][0];
        assert_eq!(result["toolUseId"], "call_1");
        assert_eq!(result["status"], "success");
        assert_eq!(result["content"][0]["text"], "42");
    }

    #[test]
    fn trailing_assistant_moves_to_history() {
        let payload = build_kiro_payload(
            &request(json!({
                "model": "m",
                "messages": [
                    {"role": "user", "content": "Start"},
                    {"role": "assistant", "content": "Partial"}
                ]
            })),
            &ctx(),
        )
        .unwrap();
        let state = &payload["conversationState"];
        let history = state["history"].as_array().unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1]["assistantResponseMessage"]["content"], "Partial");
        assert_eq!(
            state["currentMessage"]["userInputMessage"]["content"],
            "Continue"
        );
    }

    #[test]
    fn adjacent_user_messages_merge() {
        let payload = build_kiro_payload(
            &request(json!({
                "model": "m",
                "messages": [
                    {"role": "user", "content": "one"},
                    {"role": "user", "content": "two"}
                ]
            })),
            &ctx(),
        )
        .unwrap();
        let state = &payload["conversationState"];
        assert!(state.get("history").is_none());
        assert_eq!(
            state["currentMessage"]["userInputMessage"]["content"],
            "one\ntwo"
        );
    }

    #[test]
    fn long_tool_description_moves_to_system_prompt() {
        let long = "x".repeat(41);
        let payload = build_kiro_payload(
            &request(json!({
                "model": "m",
                "messages": [{"role": "user", "content": "go"}],
                "tools": [
                    {"type": "function", "function": {"name": "big", "description": long, "parameters": {"type": "object"}}},
                    {"type": "function", "function": {"name": "small", "description": "short"}}
                ]
            })),
            &ctx(),
        )
        .unwrap();
        let input = &payload["conversationState"]["currentMessage"]["userInputMessage"];
        let content = input["content"].as_str().unwrap();
        assert!(content.starts_with("---\n# Tool Documentation"));
        assert!(content.contains("## Tool: big"));
        assert!(content.ends_with("\n\ngo"));

        let tools = input["userInputMessageContext"]["tools"].as_array().unwrap();
        assert_eq!(
            tools[0]["toolSpecification"]["description"],
            "[Full documentation in system prompt under '## Tool: big']"
        );
        assert_eq!(
            tools[0]["toolSpecification"]["inputSchema"]["json"]["type"],
            "object"
        );
        assert_eq!(tools[1]["toolSpecification"]["description"], "short");
        assert_eq!(tools[1]["toolSpecification"]["inputSchema"]["json"], json!({}));
    }

    #[test]
    fn only_system_messages_is_invalid() {
        let err = build_kiro_payload(
            &request(json!({
                "model": "m",
                "messages": [{"role": "system", "content": "sys"}]
            })),
            &ctx(),
        )
        .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidRequest(_)));
    }

    #[test]
    fn empty_current_content_becomes_continue() {
        let payload = build_kiro_payload(
            &request(json!({
                "model": "m",
                "messages": [{"role": "user", "content": ""}]
            })),
            &PayloadContext {
                profile_arn: None,
                ..ctx()
            },
        )
        .unwrap();
        assert_eq!(
            payload["conversationState"]["currentMessage"]["userInputMessage"]["content"],
            "Continue"
        );
        assert!(payload.get("profileArn").is_none());
    }
}
