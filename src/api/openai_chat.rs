use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::api::common::{
    fail, open_for_request, parse_json_body, sse_streaming_response, usage_context, UNKNOWN_MODEL,
};
use crate::observability::metrics::RequestTimer;
use crate::protocol::openai_chat::response::build_chat_completion;
use crate::protocol::openai_chat::stream::OpenAiStreamEmitter;
use crate::protocol::openai_chat::OpenAiChatRequest;
use crate::protocol::IngressApi;
use crate::state::AppState;
use crate::stream::{collect_outcome, sse_event_stream};

const INGRESS: IngressApi = IngressApi::OpenAiChat;
const ENDPOINT: &str = "/v1/chat/completions";

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
    let request: OpenAiChatRequest = match parse_json_body(&body) {
        Ok(request) => request,
        Err(err) => return fail(timer, &err, INGRESS),
    };
    let is_stream = request.is_stream();
    timer.describe(&request.model, is_stream);
    tracing::info!(model = %request.model, stream = is_stream, "chat completion request");

    let usage = usage_context(&state, &request, timer.started_at());
    let upstream = match open_for_request(&state, &handle, &request).await {
        Ok(upstream) => upstream,
        Err(err) => return fail(timer, &err, INGRESS),
    };

    if is_stream {
        let emitter = OpenAiStreamEmitter::new(&request.model);
        return sse_streaming_response(sse_event_stream(upstream, emitter, usage), timer);
    }

    match collect_outcome(upstream, &usage).await {
        Ok(outcome) => {
            timer.finish(http::StatusCode::OK.as_u16());
            Json(build_chat_completion(&request.model, &outcome)).into_response()
        }
        Err(err) => fail(timer, &err, INGRESS),
    }
}
