use crate::stream::StreamOutcome;
use crate::util::{next_call_id, random_hex_id, unix_now_secs};

use super::stream::{finish_reason, usage_from_outcome};
use super::{
    OpenAiChatResponse, OpenAiChoice, OpenAiMessage, OpenAiToolCall, OpenAiToolCallFunction,
};

/// Build a `chat.completion` object from a fully collected upstream response.
#[must_use]
pub fn build_chat_completion(model: &str, outcome: &StreamOutcome) -> OpenAiChatResponse {
    let tool_calls: Vec<OpenAiToolCall> = outcome
        .tool_calls
        .iter()
        .map(|call| OpenAiToolCall {
            id: call.id.clone().unwrap_or_else(next_call_id),
            type_: "function".to_string(),
            function: OpenAiToolCallFunction {
                name: call.name.clone(),
                arguments: call.arguments.clone(),
            },
        })
        .collect();

    let mut message = OpenAiMessage::text("assistant", outcome.content.clone());
    if !tool_calls.is_empty() {
        message.tool_calls = Some(tool_calls);
    }

    OpenAiChatResponse {
        id: random_hex_id("chatcmpl-", 24),
        object: "chat.completion".to_string(),
        created: unix_now_secs(),
        model: model.to_string(),
        choices: vec![OpenAiChoice {
            index: 0,
            message,
            finish_reason: finish_reason(outcome).to_string(),
        }],
        usage: usage_from_outcome(outcome),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toolcall::ToolCall;
    use crate::usage::estimate_usage;

    #[test]
    fn completion_with_tool_calls() {
        let outcome = StreamOutcome {
            content: "Checking.".into(),
            tool_calls: vec![ToolCall {
                id: None,
                name: "lookup".into(),
                arguments: r#"{"q":"x"}"#.into(),
            }],
            usage: estimate_usage("Checking.", Some(1.0), 200_000, 0),
            metering: Some(serde_json::json!(0.5)),
            upstream_empty: false,
        };
        let response = build_chat_completion("claude-sonnet-4", &outcome);
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["object"], "chat.completion");
        assert!(json["id"].as_str().unwrap().starts_with("chatcmpl-"));
        assert_eq!(json["choices"][0]["finish_reason"], "tool_calls");
        assert_eq!(json["choices"][0]["message"]["content"], "Checking.");
        let call = &json["choices"][0]["message"]["tool_calls"][0];
        assert!(call.get("index").is_none());
        assert!(call["id"].as_str().unwrap().starts_with("call_"));
        assert_eq!(call["function"]["name"], "lookup");
        assert_eq!(json["usage"]["total_tokens"], 2000);
        assert_eq!(json["usage"]["credits_used"], 0.5);
    }

    #[test]
    fn plain_completion_stops() {
        let outcome = StreamOutcome {
            content: "Hello!".into(),
            tool_calls: Vec::new(),
            usage: estimate_usage("Hello!", None, 200_000, 3),
            metering: None,
            upstream_empty: false,
        };
        let json = serde_json::to_value(build_chat_completion("m", &outcome)).unwrap();
        assert_eq!(json["choices"][0]["finish_reason"], "stop");
        assert!(json["choices"][0]["message"].get("tool_calls").is_none());
        assert_eq!(json["usage"]["prompt_tokens"], 3);
    }
}
