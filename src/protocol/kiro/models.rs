use std::collections::BTreeMap;

use bytes::Bytes;
use serde_json::{json, Value};

use crate::config::ModelsConfig;
use crate::util::unix_now_secs;

/// Public model name to upstream model id.
const MODEL_MAPPING: &[(&str, &str)] = &[
    ("claude-opus-4-5", "claude-opus-4.5"),
    ("claude-opus-4-5-20251101", "claude-opus-4.5"),
    ("claude-haiku-4-5", "claude-haiku-4.5"),
    ("claude-haiku-4.5", "claude-haiku-4.5"),
    ("claude-sonnet-4-5", "CLAUDE_SONNET_4_5_20250929_V1_0"),
    ("claude-sonnet-4-5-20250929", "CLAUDE_SONNET_4_5_20250929_V1_0"),
    ("claude-sonnet-4", "CLAUDE_SONNET_4_20250514_V1_0"),
    ("claude-sonnet-4-20250514", "CLAUDE_SONNET_4_20250514_V1_0"),
    ("claude-3-7-sonnet-20250219", "CLAUDE_3_7_SONNET_20250219_V1_0"),
    ("auto", "claude-sonnet-4.5"),
];

/// Models advertised on `/v1/models`.
pub const AVAILABLE_MODELS: &[&str] = &[
    "claude-opus-4-5",
    "claude-opus-4-5-20251101",
    "claude-haiku-4-5",
    "claude-sonnet-4-5",
    "claude-sonnet-4-5-20250929",
    "claude-sonnet-4",
    "claude-sonnet-4-20250514",
    "claude-3-7-sonnet-20250219",
];

/// Model metadata: id mapping, context windows and the `/v1/models` body.
pub struct ModelCatalog {
    aliases: BTreeMap<String, String>,
    max_input_tokens: BTreeMap<String, u64>,
    default_max_input_tokens: u64,
    list_body: Bytes,
}

impl ModelCatalog {
    #[must_use]
    pub fn new(config: &ModelsConfig) -> Self {
        let mut advertised: Vec<&str> = AVAILABLE_MODELS.to_vec();
        for alias in config.aliases.keys() {
            if !advertised.contains(&alias.as_str()) {
                advertised.push(alias);
            }
        }
        Self {
            aliases: config.aliases.clone(),
            max_input_tokens: config.max_input_tokens.clone(),
            default_max_input_tokens: config.default_max_input_tokens,
            list_body: build_list_body(&advertised),
        }
    }

    /// Upstream model id for a public model name. Unknown names pass through.
    #[must_use]
    pub fn internal_model_id<'a>(&'a self, model: &'a str) -> &'a str {
        if let Some(mapped) = self.aliases.get(model) {
            return mapped;
        }
        MODEL_MAPPING
            .iter()
            .find(|(public, _)| *public == model)
            .map_or(model, |(_, internal)| internal)
    }

    /// Context window used to turn a context-usage percentage into tokens.
    #[must_use]
    pub fn max_input_tokens(&self, model: &str) -> u64 {
        self.max_input_tokens
            .get(model)
            .copied()
            .unwrap_or(self.default_max_input_tokens)
    }

    /// Serialized `OpenAI` model list.
    #[must_use]
    pub fn list_body(&self) -> Bytes {
        self.list_body.clone()
    }
}

fn build_list_body(models: &[&str]) -> Bytes {
    let created = unix_now_secs();
    let data: Vec<Value> = models
        .iter()
        .map(|id| {
            json!({
                "id": id,
                "object": "model",
                "created": created,
                "owned_by": "anthropic",
            })
        })
        .collect();
    let body = json!({ "object": "list", "data": data });
    Bytes::from(body.to_string())
}
