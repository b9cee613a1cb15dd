//! First-token retry and per-chunk read timeouts around one logical request.
//!
//! [`open_upstream`] issues attempts until the first body chunk arrives, so
//! a retry never replaces bytes the client already saw. After that,
//! [`UpstreamBody::next_chunk`] tolerates a bounded run of slow reads.

use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;

use crate::config::StreamingConfig;
use crate::error::{upstream_error_message, GatewayError};
use crate::transport::KiroSession;

use super::{StreamOutcome, StreamSession, UsageContext};

/// Timeouts for one model, after the slow-model multiplier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeoutPolicy {
    pub first_token: Duration,
    pub stream_read: Duration,
    pub first_token_max_retries: u32,
    pub max_consecutive_timeouts: u32,
}

impl TimeoutPolicy {
    #[must_use]
    pub fn for_model(config: &StreamingConfig, model: &str) -> Self {
        let model_lower = model.to_ascii_lowercase();
        let slow = config
            .slow_model_patterns
            .iter()
            .any(|pattern| model_lower.contains(&pattern.to_ascii_lowercase()));
        let multiplier = if slow {
            config.slow_model_timeout_multiplier
        } else {
            1.0
        };
        Self {
            first_token: secs(config.first_token_timeout_secs * multiplier),
            stream_read: secs(config.stream_read_timeout_secs * multiplier),
            first_token_max_retries: config.first_token_max_retries.max(1),
            max_consecutive_timeouts: config.max_consecutive_timeouts,
        }
    }
}

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::from_secs(1))
}

/// A successful upstream response whose first chunk has already arrived.
pub struct UpstreamBody {
    first_chunk: Option<Bytes>,
    body: BoxStream<'static, reqwest::Result<Bytes>>,
    stream_read: Duration,
    max_consecutive_timeouts: u32,
    consecutive_timeouts: u32,
}

impl UpstreamBody {
    #[must_use]
    pub fn new(
        first_chunk: Option<Bytes>,
        body: BoxStream<'static, reqwest::Result<Bytes>>,
        policy: &TimeoutPolicy,
    ) -> Self {
        Self {
            first_chunk,
            body,
            stream_read: policy.stream_read,
            max_consecutive_timeouts: policy.max_consecutive_timeouts,
            consecutive_timeouts: 0,
        }
    }

    /// Next body chunk, or `None` at the end of the body.
    ///
    /// Up to `max_consecutive_timeouts` slow reads in a row are logged and
    /// waited out; the next one fails with
    /// [`GatewayError::StreamReadTimeout`].
    pub async fn next_chunk(&mut self) -> Option<Result<Bytes, GatewayError>> {
        if let Some(chunk) = self.first_chunk.take() {
            return Some(Ok(chunk));
        }
        loop {
            match tokio::time::timeout(self.stream_read, self.body.next()).await {
                Ok(Some(Ok(chunk))) => {
                    self.consecutive_timeouts = 0;
                    return Some(Ok(chunk));
                }
                Ok(Some(Err(err))) => {
                    return Some(Err(GatewayError::Transport(format!(
                        "upstream body read failed: {err}"
                    ))));
                }
                Ok(None) => return None,
                Err(_) => {
                    self.consecutive_timeouts += 1;
                    if self.consecutive_timeouts <= self.max_consecutive_timeouts {
                        tracing::warn!(
                            consecutive = self.consecutive_timeouts,
                            max = self.max_consecutive_timeouts,
                            timeout_secs = self.stream_read.as_secs_f64(),
                            "upstream read timed out, still waiting"
                        );
                        continue;
                    }
                    tracing::error!(
                        consecutive = self.consecutive_timeouts,
                        "upstream stalled, giving up"
                    );
                    return Some(Err(GatewayError::StreamReadTimeout {
                        timeout_secs: self.stream_read.as_secs_f64(),
                        consecutive: self.consecutive_timeouts,
                    }));
                }
            }
        }
    }
}

/// Send `payload` and wait for the first body chunk, retrying only when
/// that wait times out.
///
/// Each retry is a fresh request; the timed-out response is dropped first.
///
/// # Errors
///
/// - [`GatewayError::Upstream`] for a non-success status (not retried here).
/// - [`GatewayError::FirstTokenTimeout`] when every attempt timed out.
/// - Session and transport errors as returned by [`KiroSession::send_generate`].
pub async fn open_upstream(
    session: &KiroSession,
    payload: Bytes,
    policy: &TimeoutPolicy,
    model: &str,
) -> Result<UpstreamBody, GatewayError> {
    for attempt in 0..policy.first_token_max_retries {
        if attempt > 0 {
            tracing::warn!(
                model,
                attempt = attempt + 1,
                max_attempts = policy.first_token_max_retries,
                "retrying after first token timeout"
            );
        }

        let response = session.send_generate(payload.clone()).await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            tracing::error!(status = status.as_u16(), "upstream error: {text}");
            return Err(GatewayError::Upstream {
                status: status.as_u16(),
                message: upstream_error_message(&text),
            });
        }

        let mut body = response.bytes_stream().boxed();
        match tokio::time::timeout(policy.first_token, body.next()).await {
            Ok(Some(Ok(chunk))) => return Ok(UpstreamBody::new(Some(chunk), body, policy)),
            Ok(Some(Err(err))) => {
                return Err(GatewayError::Transport(format!(
                    "upstream body read failed: {err}"
                )));
            }
            Ok(None) => {
                tracing::debug!(model, "empty response from upstream");
                return Ok(UpstreamBody::new(None, body, policy));
            }
            Err(_) => {
                tracing::warn!(
                    model,
                    attempt = attempt + 1,
                    timeout_secs = policy.first_token.as_secs_f64(),
                    "first token timeout"
                );
                drop(body);
            }
        }
    }

    tracing::error!(
        model,
        attempts = policy.first_token_max_retries,
        "all attempts failed due to first token timeout"
    );
    Err(GatewayError::FirstTokenTimeout {
        timeout_secs: policy.first_token.as_secs_f64(),
        attempts: policy.first_token_max_retries,
    })
}

/// An upstream body whose first chunk has already been decoded.
///
/// Holding one means the upstream answered with well-formed frames and no
/// exception, so the client can be sent a success head.
pub struct PrimedUpstream {
    upstream: UpstreamBody,
    session: StreamSession,
    deltas: Vec<String>,
}

impl PrimedUpstream {
    /// Decode the first chunk of `upstream`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::FrameDecode`] for a corrupt frame or an
    /// upstream exception in the first chunk.
    pub fn prime(mut upstream: UpstreamBody) -> Result<Self, GatewayError> {
        let mut session = StreamSession::new();
        let deltas = match upstream.first_chunk.take() {
            Some(chunk) => session.feed(&chunk)?,
            None => Vec::new(),
        };
        Ok(Self {
            upstream,
            session,
            deltas,
        })
    }

    /// The remaining body, the decode session and the content deltas of the
    /// first chunk.
    #[must_use]
    pub fn into_parts(self) -> (UpstreamBody, StreamSession, Vec<String>) {
        (self.upstream, self.session, self.deltas)
    }
}

/// Drain the body into a finished [`StreamOutcome`] for non-streaming responses.
///
/// # Errors
///
/// Returns read, timeout and frame decode errors.
pub async fn collect_outcome(
    primed: PrimedUpstream,
    usage: &UsageContext,
) -> Result<StreamOutcome, GatewayError> {
    let (mut upstream, mut session, _) = primed.into_parts();
    while let Some(chunk) = upstream.next_chunk().await {
        session.feed(&chunk?)?;
    }
    let outcome = session.finish(usage)?;
    usage.report(&outcome.usage);
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eventstream::{encode_event_frame, encode_exception_frame};

    #[test]
    fn slow_models_get_longer_timeouts() {
        let config = StreamingConfig::default();
        let fast = TimeoutPolicy::for_model(&config, "claude-sonnet-4-5");
        let slow = TimeoutPolicy::for_model(&config, "claude-Opus-4-5");
        assert_eq!(fast.first_token, Duration::from_secs(15));
        assert_eq!(slow.first_token, Duration::from_secs(45));
        assert_eq!(slow.stream_read, Duration::from_secs(900));
        assert_eq!(fast.max_consecutive_timeouts, 3);
    }

    fn body_from(chunks: Vec<&'static [u8]>) -> BoxStream<'static, reqwest::Result<Bytes>> {
        futures_util::stream::iter(chunks.into_iter().map(|c| Ok(Bytes::from_static(c)))).boxed()
    }

    #[tokio::test]
    async fn first_chunk_is_replayed_before_the_rest() {
        let policy = TimeoutPolicy::for_model(&StreamingConfig::default(), "m");
        let mut body = UpstreamBody::new(Some(Bytes::from_static(b"a")), body_from(vec![b"b"]), &policy);
        assert_eq!(body.next_chunk().await.unwrap().unwrap(), "a");
        assert_eq!(body.next_chunk().await.unwrap().unwrap(), "b");
        assert!(body.next_chunk().await.is_none());
    }

    #[test]
    fn priming_decodes_the_first_chunk() {
        let policy = TimeoutPolicy::for_model(&StreamingConfig::default(), "m");
        let frame = encode_event_frame("assistantResponseEvent", br#"{"content":"Hi"}"#);
        let body = UpstreamBody::new(Some(Bytes::from(frame)), body_from(Vec::new()), &policy);
        let (_, session, deltas) = PrimedUpstream::prime(body).unwrap().into_parts();
        assert_eq!(deltas, ["Hi"]);
        assert_eq!(session.content(), "Hi");
    }

    #[test]
    fn priming_rejects_an_exception_in_the_first_chunk() {
        let policy = TimeoutPolicy::for_model(&StreamingConfig::default(), "m");
        let mut bytes = encode_event_frame("assistantResponseEvent", br#"{"content":"Hi"}"#);
        bytes.extend(encode_exception_frame("ThrottlingException", "slow down"));
        let body = UpstreamBody::new(Some(Bytes::from(bytes)), body_from(Vec::new()), &policy);
        let err = PrimedUpstream::prime(body).err().unwrap();
        assert_eq!(err.status_code(), http::StatusCode::BAD_GATEWAY);
        assert!(err.client_message().contains("slow down"));
    }

    #[test]
    fn fractional_timeouts_keep_their_precision() {
        let config = StreamingConfig {
            first_token_timeout_secs: 7.5,
            ..StreamingConfig::default()
        };
        let policy = TimeoutPolicy::for_model(&config, "claude-opus-4-5");
        let err = GatewayError::FirstTokenTimeout {
            timeout_secs: policy.first_token.as_secs_f64(),
            attempts: 3,
        };
        assert!(err.to_string().contains("within 22.5s"));
    }

    #[tokio::test]
    async fn stalled_body_fails_after_tolerated_timeouts() {
        let policy = TimeoutPolicy {
            first_token: Duration::from_millis(10),
            stream_read: Duration::from_millis(10),
            first_token_max_retries: 1,
            max_consecutive_timeouts: 2,
        };
        let mut body = UpstreamBody::new(None, futures_util::stream::pending().boxed(), &policy);
        let err = body.next_chunk().await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            GatewayError::StreamReadTimeout { consecutive: 3, .. }
        ));
    }
}
