use std::time::{Duration, SystemTime};

use http::header::RETRY_AFTER;

use crate::config::KiroConfig;

pub(crate) const RETRY_BACKOFF_MAX_MS: u64 = 30_000;
pub(crate) const RETRY_AFTER_MAX_SECS: u64 = 30;

/// Attempt budget and backoff base for upstream calls.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub fn from_config(config: &KiroConfig) -> Self {
        Self {
            max_attempts: config.max_retries.max(1),
            base_delay: Duration::from_millis(config.base_retry_delay_ms),
        }
    }

    /// Whether another attempt fits after `attempt` (zero-based) failed.
    #[inline]
    #[must_use]
    pub fn has_attempt_after(&self, attempt: u32) -> bool {
        attempt + 1 < self.max_attempts
    }

    /// `base_delay * 2^attempt`, capped.
    #[inline]
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let shift = attempt.min(10);
        let multiplier = 1_u64 << shift;
        let base_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(
            base_ms
                .saturating_mul(multiplier)
                .min(RETRY_BACKOFF_MAX_MS),
        )
    }

    /// `Retry-After` when the upstream sent one, otherwise exponential backoff.
    #[inline]
    #[must_use]
    pub fn delay_for_response(&self, headers: &http::HeaderMap, attempt: u32) -> Duration {
        parse_retry_after_delay(headers).unwrap_or_else(|| self.backoff_delay(attempt))
    }
}

/// Rate limiting and server errors are worth another attempt.
#[inline]
pub(crate) fn should_retry_upstream_status(status: http::StatusCode) -> bool {
    status == http::StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

#[inline]
pub(crate) fn parse_retry_after_delay(headers: &http::HeaderMap) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(seconds) = raw.parse::<u64>() {
        return Some(Duration::from_secs(seconds.min(RETRY_AFTER_MAX_SECS)));
    }

    let target = httpdate::parse_http_date(raw).ok()?;
    let delay = target.duration_since(SystemTime::now()).unwrap_or_default();
    Some(delay.min(Duration::from_secs(RETRY_AFTER_MAX_SECS)))
}
