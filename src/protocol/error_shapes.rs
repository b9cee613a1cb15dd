use crate::error::ErrorCategory;

fn openai_error_type(cat: ErrorCategory) -> &'static str {
    match cat {
        ErrorCategory::InvalidRequest => "invalid_request_error",
        ErrorCategory::Authentication => "authentication_error",
        ErrorCategory::Timeout => "timeout_error",
        ErrorCategory::UpstreamApi => "kiro_api_error",
        ErrorCategory::ServerError => "server_error",
    }
}

fn openai_error_code(cat: ErrorCategory, status: http::StatusCode) -> serde_json::Value {
    match cat {
        ErrorCategory::InvalidRequest => "invalid_request".into(),
        ErrorCategory::Authentication => "invalid_api_key".into(),
        ErrorCategory::Timeout => "timeout".into(),
        ErrorCategory::UpstreamApi => status.as_u16().into(),
        ErrorCategory::ServerError => "server_error".into(),
    }
}

fn anthropic_error_type(cat: ErrorCategory) -> &'static str {
    match cat {
        ErrorCategory::InvalidRequest => "invalid_request_error",
        ErrorCategory::Authentication => "authentication_error",
        ErrorCategory::Timeout | ErrorCategory::UpstreamApi | ErrorCategory::ServerError => {
            "api_error"
        }
    }
}

#[must_use]
pub(crate) fn openai_error_payload(
    cat: ErrorCategory,
    status: http::StatusCode,
    message: &str,
) -> serde_json::Value {
    serde_json::json!({
        "error": {
            "message": message,
            "type": openai_error_type(cat),
            "code": openai_error_code(cat, status),
        }
    })
}

#[must_use]
pub(crate) fn anthropic_error_payload(cat: ErrorCategory, message: &str) -> serde_json::Value {
    serde_json::json!({
        "type": "error",
        "error": {
            "type": anthropic_error_type(cat),
            "message": message,
        }
    })
}

/// In-band Anthropic `error` SSE event for failures after the stream began.
#[must_use]
pub(crate) fn anthropic_error_event(message: &str) -> String {
    let body = anthropic_error_payload(ErrorCategory::ServerError, message);
    format!("event: error\ndata: {body}\n\n")
}
