//! Tool-call reconstruction: native fragment accumulation, bracket-text
//! extraction and the final merge both emitters consume.

pub mod bracket;
pub mod dedupe;

pub use bracket::extract_bracket_tool_calls;
pub use dedupe::dedupe_tool_calls;

use crate::util::next_call_id;

/// A complete tool call, whatever its provenance.
///
/// `arguments` always holds compact, valid JSON. `id` is `None` for calls
/// recovered from text; emitters assign one on output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCall {
    pub id: Option<String>,
    pub name: String,
    pub arguments: String,
}

impl ToolCall {
    /// Arguments as a JSON value, `{}` when they somehow fail to parse.
    #[must_use]
    pub fn arguments_value(&self) -> serde_json::Value {
        serde_json::from_str(&self.arguments)
            .unwrap_or_else(|_| serde_json::Value::Object(serde_json::Map::new()))
    }
}

struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Rebuilds native tool calls from streamed fragments.
///
/// A fragment naming a tool with an id different from the open call starts
/// a new call and closes the previous one. Fragments without a name (or with
/// the open call's id) append to the open call's arguments. `stop` closes it.
#[derive(Default)]
pub struct ToolCallAccumulator {
    current: Option<PartialToolCall>,
    finished: Vec<ToolCall>,
}

impl ToolCallAccumulator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_fragment(
        &mut self,
        id: Option<&str>,
        name: Option<&str>,
        arguments_chunk: &str,
        stop: bool,
    ) {
        let continues_current = match (&self.current, id) {
            (Some(current), Some(id)) => current.id == id,
            (Some(_), None) => true,
            (None, _) => false,
        };

        if continues_current {
            if let Some(current) = self.current.as_mut() {
                current.arguments.push_str(arguments_chunk);
            }
        } else if let Some(name) = name {
            self.finalize_current();
            self.current = Some(PartialToolCall {
                id: id.map_or_else(next_call_id, str::to_string),
                name: name.to_string(),
                arguments: arguments_chunk.to_string(),
            });
        } else {
            tracing::debug!("dropping tool input fragment with no open tool call");
        }

        if stop {
            self.finalize_current();
        }
    }

    /// Close any open call and return every native call in arrival order.
    #[must_use]
    pub fn finish(mut self) -> Vec<ToolCall> {
        self.finalize_current();
        self.finished
    }

    fn finalize_current(&mut self) {
        let Some(partial) = self.current.take() else {
            return;
        };
        let arguments = normalize_arguments(&partial.name, &partial.arguments);
        self.finished.push(ToolCall {
            id: Some(partial.id),
            name: partial.name,
            arguments,
        });
    }
}

/// Re-serialize raw arguments compactly; empty or invalid input becomes `{}`.
pub(crate) fn normalize_arguments(name: &str, raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return "{}".to_string();
    }
    match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(value) => value.to_string(),
        Err(err) => {
            tracing::warn!(tool = name, "tool arguments are not valid JSON, using {{}}: {err}");
            "{}".to_string()
        }
    }
}
