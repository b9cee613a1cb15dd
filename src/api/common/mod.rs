//! Shared API helpers reused across ingress handlers.

mod streaming;

use std::time::Instant;

use axum::response::Response;
use bytes::Bytes;
use serde::de::DeserializeOwned;

use crate::error::{into_axum_response, GatewayError};
use crate::observability::metrics::RequestTimer;
use crate::observability::token_counter::count_request_tokens;
use crate::protocol::kiro::{build_kiro_payload, PayloadContext};
use crate::protocol::openai_chat::OpenAiChatRequest;
use crate::protocol::IngressApi;
use crate::state::{AppState, SessionHandle};
use crate::stream::{open_upstream, PrimedUpstream, TimeoutPolicy, UpstreamBody, UsageContext};

pub(crate) use streaming::sse_streaming_response;

/// Model name recorded for requests rejected before their body was read.
pub(crate) const UNKNOWN_MODEL: &str = "unknown";

pub(crate) fn parse_json_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, GatewayError> {
    serde_json::from_slice(body)
        .map_err(|err| GatewayError::InvalidRequest(format!("Invalid JSON body: {err}")))
}

/// Record the failed request and render the error in the ingress shape.
pub(crate) fn fail(timer: RequestTimer, err: &GatewayError, ingress: IngressApi) -> Response {
    let status = err.status_code();
    if status.is_server_error() {
        tracing::error!(api = ingress.as_str(), status = status.as_u16(), "request failed: {err}");
    } else {
        tracing::warn!(api = ingress.as_str(), status = status.as_u16(), "request rejected: {err}");
    }
    timer.finish(status.as_u16());
    into_axum_response(err, ingress)
}

/// Usage inputs for a request, counted locally before any upstream call.
pub(crate) fn usage_context(
    state: &AppState,
    request: &OpenAiChatRequest,
    started: Instant,
) -> UsageContext {
    UsageContext {
        model: request.model.clone(),
        max_input_tokens: state.models.max_input_tokens(&request.model),
        local_prompt_tokens: count_request_tokens(&request.messages, request.tools.as_deref()),
        started,
        metrics: state.metrics(),
    }
}

/// Build the upstream payload, open the upstream body for `request` and
/// decode its first chunk, so upstream failures surface before any response
/// head is sent.
///
/// A tenant session whose credentials were rejected is evicted so the next
/// request with that key starts from scratch.
pub(crate) async fn open_for_request(
    state: &AppState,
    handle: &SessionHandle<'_>,
    request: &OpenAiChatRequest,
) -> Result<PrimedUpstream, GatewayError> {
    let result = open_inner(state, handle, request)
        .await
        .and_then(PrimedUpstream::prime);
    if let (Err(GatewayError::Auth(_)), Some(tenant)) = (&result, handle.tenant) {
        if state.evict_tenant_session(tenant) {
            tracing::warn!("evicted tenant session after authentication failure");
        }
    }
    result
}

async fn open_inner(
    state: &AppState,
    handle: &SessionHandle<'_>,
    request: &OpenAiChatRequest,
) -> Result<UpstreamBody, GatewayError> {
    // Refresh first so a fresh session knows its profile ARN.
    handle.session.access_token().await?;
    let profile_arn = handle.session.profile_arn().await;

    let model_id = state.models.internal_model_id(&request.model);
    let conversation_id = state.next_conversation_id();
    let payload = build_kiro_payload(
        request,
        &PayloadContext {
            conversation_id: &conversation_id,
            model_id,
            profile_arn: profile_arn.as_deref(),
            tool_description_max_length: state.config.features.tool_description_max_length,
        },
    )?;
    let payload = serde_json::to_vec(&payload)
        .map(Bytes::from)
        .map_err(|err| GatewayError::Internal(format!("failed to serialize payload: {err}")))?;

    tracing::debug!(
        model = %request.model,
        model_id,
        conversation_id = %conversation_id,
        messages = request.messages.len(),
        payload_bytes = payload.len(),
        "sending request upstream"
    );

    let policy = TimeoutPolicy::for_model(&state.config.streaming, &request.model);
    open_upstream(&handle.session, payload, &policy, &request.model).await
}
