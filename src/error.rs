use crate::eventstream::FrameDecodeError;
use crate::protocol::error_shapes::{anthropic_error_payload, openai_error_payload};
use crate::protocol::IngressApi;

/// Error type shared by every layer of the gateway.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("{0}")]
    Auth(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Upstream error: status={status}, message={message}")]
    Upstream { status: u16, message: String },
    #[error("Upstream stream error: {0}")]
    FrameDecode(#[from] FrameDecodeError),
    #[error("Model did not respond within {timeout_secs}s after {attempts} attempts. Please try again.")]
    FirstTokenTimeout { timeout_secs: f64, attempts: u32 },
    #[error("Upstream stalled: {consecutive} consecutive reads exceeded {timeout_secs}s")]
    StreamReadTimeout { timeout_secs: f64, consecutive: u32 },
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Broad error category for error `type` selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    InvalidRequest,
    Authentication,
    Timeout,
    UpstreamApi,
    ServerError,
}

impl GatewayError {
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            GatewayError::InvalidRequest(_) => ErrorCategory::InvalidRequest,
            GatewayError::Auth(_) => ErrorCategory::Authentication,
            GatewayError::FirstTokenTimeout { .. } | GatewayError::StreamReadTimeout { .. } => {
                ErrorCategory::Timeout
            }
            GatewayError::Upstream { .. } => ErrorCategory::UpstreamApi,
            GatewayError::Config(_)
            | GatewayError::FrameDecode(_)
            | GatewayError::Transport(_)
            | GatewayError::Internal(_) => ErrorCategory::ServerError,
        }
    }

    #[must_use]
    pub fn status_code(&self) -> http::StatusCode {
        match self {
            GatewayError::Auth(_) => http::StatusCode::UNAUTHORIZED,
            GatewayError::InvalidRequest(_) => http::StatusCode::BAD_REQUEST,
            GatewayError::Upstream { status, .. } => http::StatusCode::from_u16(*status)
                .unwrap_or(http::StatusCode::BAD_GATEWAY),
            GatewayError::FirstTokenTimeout { .. } | GatewayError::StreamReadTimeout { .. } => {
                http::StatusCode::GATEWAY_TIMEOUT
            }
            GatewayError::FrameDecode(_) | GatewayError::Transport(_) => {
                http::StatusCode::BAD_GATEWAY
            }
            GatewayError::Config(_) | GatewayError::Internal(_) => {
                http::StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Text shown to the client. Upstream errors show the upstream's message as-is.
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            GatewayError::Upstream { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

/// Build the client-visible message of a failed upstream response body.
///
/// JSON bodies with a `message` field yield that message, plus ` (reason: X)`
/// when a `reason` field is present. Anything else is returned verbatim.
#[must_use]
pub fn upstream_error_message(body: &str) -> String {
    let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(body)
    else {
        return body.to_string();
    };
    let Some(message) = map.get("message").and_then(serde_json::Value::as_str) else {
        return body.to_string();
    };
    match map.get("reason") {
        Some(serde_json::Value::String(reason)) => format!("{message} (reason: {reason})"),
        Some(serde_json::Value::Null) | None => message.to_string(),
        Some(reason) => format!("{message} (reason: {reason})"),
    }
}

/// Format an error for a given ingress API, returning (`status_code`, JSON body).
#[must_use]
pub fn format_error(
    err: &GatewayError,
    ingress: IngressApi,
) -> (http::StatusCode, serde_json::Value) {
    let status = err.status_code();
    let message = err.client_message();

    let body = match ingress {
        IngressApi::OpenAiChat => openai_error_payload(err.category(), status, &message),
        IngressApi::Anthropic => anthropic_error_payload(err.category(), &message),
    };

    (status, body)
}

/// Convert a `GatewayError` into an axum response for a specific ingress.
#[must_use]
pub fn into_axum_response(err: &GatewayError, ingress: IngressApi) -> axum::response::Response {
    use axum::response::IntoResponse;
    let (status, body) = format_error(err, ingress);
    (status, axum::Json(body)).into_response()
}

/// Default `IntoResponse` implementation uses `OpenAiChat` as the fallback ingress.
/// Real handlers should call [`into_axum_response`] with the correct ingress instead.
impl axum::response::IntoResponse for GatewayError {
    fn into_response(self) -> axum::response::Response {
        into_axum_response(&self, IngressApi::OpenAiChat)
    }
}
