//! Recover tool calls that the model wrote as plain text.
//!
//! Two conventions are recognized, case-insensitively, anywhere in the text:
//!
//! - `[Called lookup with args: {"q": "x"}]`
//! - `[Tool: lookup] {"q": "x"}`
//!
//! In both, the argument object must follow the header (whitespace aside).
//! The object is delimited with a string-aware brace matcher, so braces
//! inside JSON strings do not end it early. A call whose arguments are not
//! valid JSON is skipped.

use std::sync::LazyLock;

use regex_lite::Regex;

use super::ToolCall;

static CALLED_WITH_ARGS: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)\[called\s+([A-Za-z0-9_.\-]+)\s+with\s+args:\s*").ok()
});

static TOOL_PREFIX: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)\[tool:\s*([A-Za-z0-9_.\-]+)\s*\]\s*").ok());

/// Extract every bracket-style tool call from accumulated content, in text order.
#[must_use]
pub fn extract_bracket_tool_calls(text: &str) -> Vec<ToolCall> {
    if memchr::memchr(b'[', text.as_bytes()).is_none() {
        return Vec::new();
    }

    let mut found: Vec<(usize, ToolCall)> = Vec::new();
    for pattern in [&*CALLED_WITH_ARGS, &*TOOL_PREFIX].into_iter().flatten() {
        for caps in pattern.captures_iter(text) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            if let Some(call) = parse_call_at(text, name.as_str(), whole.end()) {
                found.push((whole.start(), call));
            }
        }
    }

    found.sort_by_key(|(start, _)| *start);
    found.into_iter().map(|(_, call)| call).collect()
}

fn parse_call_at(text: &str, name: &str, args_start: usize) -> Option<ToolCall> {
    if text.as_bytes().get(args_start) != Some(&b'{') {
        tracing::debug!(tool = name, "bracket tool call without argument object, skipping");
        return None;
    }
    let Some(end) = find_matching_brace(text, args_start) else {
        tracing::debug!(tool = name, "bracket tool call with unbalanced braces, skipping");
        return None;
    };
    match serde_json::from_str::<serde_json::Value>(&text[args_start..=end]) {
        Ok(arguments) => Some(ToolCall {
            id: None,
            name: name.to_string(),
            arguments: arguments.to_string(),
        }),
        Err(err) => {
            tracing::debug!(tool = name, "bracket tool call arguments are not JSON: {err}");
            None
        }
    }
}

/// Byte offset of the `}` closing the object opened at `start`.
///
/// Quotes and backslash escapes are tracked so braces inside strings are
/// ignored. Returns `None` when `start` is not `{` or the object never closes.
#[must_use]
pub fn find_matching_brace(text: &str, start: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    if bytes.get(start) != Some(&b'{') {
        return None;
    }

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, byte) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match byte {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_called_with_args_convention() {
        let text = "Let me look.\n[Called get_weather with args: {\"city\": \"Paris\"}]\nDone.";
        let calls = extract_bracket_tool_calls(text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "get_weather");
        assert_eq!(calls[0].arguments, r#"{"city":"Paris"}"#);
        assert!(calls[0].id.is_none());
    }

    #[test]
    fn extracts_tool_prefix_convention() {
        let text = "[Tool: search]\n{\"query\": \"rust\", \"limit\": 3}";
        let calls = extract_bracket_tool_calls(text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "search");
        assert_eq!(calls[0].arguments, r#"{"limit":3,"query":"rust"}"#);
    }

    #[test]
    fn mixed_conventions_keep_text_order() {
        let text = "[tool: b] {\"n\":2} then [CALLED a WITH ARGS: {\"n\":1}]";
        let names: Vec<String> = extract_bracket_tool_calls(text)
            .into_iter()
            .map(|call| call.name)
            .collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn nested_objects_and_braces_in_strings() {
        let text = r#"[Called write with args: {"path": "a}b", "meta": {"k": "{x}"}, "q": "say \"}\""}]"#;
        let calls = extract_bracket_tool_calls(text);
        assert_eq!(calls.len(), 1);
        let args: serde_json::Value = serde_json::from_str(&calls[0].arguments).unwrap();
        assert_eq!(args["path"], "a}b");
        assert_eq!(args["meta"]["k"], "{x}");
        assert_eq!(args["q"], "say \"}\"");
    }

    #[test]
    fn malformed_calls_are_skipped_not_fatal() {
        let text = "[Called broken with args: {\"a\": }] and [Called open with args: {\"a\": 1 \
                    and [Called ok with args: {}]";
        let calls = extract_bracket_tool_calls(text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "ok");
        assert_eq!(calls[0].arguments, "{}");
    }

    #[test]
    fn header_without_object_is_ignored() {
        assert!(extract_bracket_tool_calls("[Called thing with args: none]").is_empty());
        assert!(extract_bracket_tool_calls("plain text, no brackets").is_empty());
    }

    #[test]
    fn find_matching_brace_handles_escapes() {
        let text = r#"{"a":"\\"}"#;
        assert_eq!(find_matching_brace(text, 0), Some(text.len() - 1));
        assert_eq!(find_matching_brace("{\"a\":1", 0), None);
        assert_eq!(find_matching_brace("x{}", 0), None);
    }
}
