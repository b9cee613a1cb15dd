use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::api::common::{
    fail, open_for_request, parse_json_body, sse_streaming_response, usage_context, UNKNOWN_MODEL,
};
use crate::observability::metrics::RequestTimer;
use crate::protocol::anthropic::convert::anthropic_to_openai_request;
use crate::protocol::anthropic::response::build_message;
use crate::protocol::anthropic::stream::AnthropicStreamEmitter;
use crate::protocol::anthropic::AnthropicRequest;
use crate::protocol::IngressApi;
use crate::state::AppState;
use crate::stream::{collect_outcome, sse_event_stream};

const INGRESS: IngressApi = IngressApi::Anthropic;
const ENDPOINT: &str = "/v1/messages";

pub async fn handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: bytes::Bytes,
) -> Response {
    let mut timer = RequestTimer::start(state.metrics(), ENDPOINT, UNKNOWN_MODEL, false, INGRESS);

    let handle = match state.authenticate(&headers) {
        Ok(handle) => handle,
        Err(err) => return fail(timer, &err, INGRESS),
    };
    let request: AnthropicRequest = match parse_json_body(&body) {
        Ok(request) => request,
        Err(err) => return fail(timer, &err, INGRESS),
    };
    let model = request.model.clone();
    let is_stream = request.is_stream();
    timer.describe(&model, is_stream);
    tracing::info!(model = %model, stream = is_stream, "messages request");

    let request = match anthropic_to_openai_request(request) {
        Ok(request) => request,
        Err(err) => return fail(timer, &err, INGRESS),
    };
    // message_start goes out before the upstream's context usage is known, so
    // it carries the local count.
    let usage = usage_context(&state, &request, timer.started_at());
    let input_tokens = usage.local_prompt_tokens;

    let upstream = match open_for_request(&state, &handle, &request).await {
        Ok(upstream) => upstream,
        Err(err) => return fail(timer, &err, INGRESS),
    };

    if is_stream {
        let emitter = AnthropicStreamEmitter::new(&model, input_tokens);
        return sse_streaming_response(sse_event_stream(upstream, emitter, usage), timer);
    }

    match collect_outcome(upstream, &usage).await {
        Ok(outcome) => {
            timer.finish(http::StatusCode::OK.as_u16());
            Json(build_message(&model, &outcome)).into_response()
        }
        Err(err) => fail(timer, &err, INGRESS),
    }
}
