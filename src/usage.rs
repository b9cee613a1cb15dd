//! Token usage for a finished response.
//!
//! The upstream reports no token counts, only the share of the model's
//! context window in use. When that share is present the total is derived
//! from it and the prompt is whatever the completion does not account for.
//! Otherwise both sides are counted locally.

use crate::observability::token_counter::count_tokens;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageSource {
    ApiDerived,
    LocalTokenizer,
}

impl UsageSource {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            UsageSource::ApiDerived => "api-derived",
            UsageSource::LocalTokenizer => "local-tokenizer",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageEstimate {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub prompt_source: UsageSource,
    pub total_source: UsageSource,
}

/// Compute usage for `full_text`.
///
/// `local_prompt_tokens` is the local count of the request's messages and
/// tools; it is computed up front because the Anthropic stream needs it
/// before the first upstream byte.
#[must_use]
pub fn estimate_usage(
    full_text: &str,
    context_usage_pct: Option<f64>,
    max_input_tokens: u64,
    local_prompt_tokens: u64,
) -> UsageEstimate {
    let completion_tokens = count_tokens(full_text);

    let api_total = context_usage_pct
        .filter(|pct| pct.is_finite() && *pct > 0.0)
        .map(|pct| total_from_percentage(pct, max_input_tokens))
        .filter(|total| *total > 0);

    match api_total {
        Some(total_tokens) => UsageEstimate {
            prompt_tokens: total_tokens.saturating_sub(completion_tokens),
            completion_tokens,
            total_tokens,
            prompt_source: UsageSource::ApiDerived,
            total_source: UsageSource::ApiDerived,
        },
        None => UsageEstimate {
            prompt_tokens: local_prompt_tokens,
            completion_tokens,
            total_tokens: local_prompt_tokens + completion_tokens,
            prompt_source: UsageSource::LocalTokenizer,
            total_source: UsageSource::LocalTokenizer,
        },
    }
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn total_from_percentage(pct: f64, max_input_tokens: u64) -> u64 {
    // f64 -> u64 casts saturate; pct is finite and positive here.
    (pct / 100.0 * max_input_tokens as f64).round() as u64
}
