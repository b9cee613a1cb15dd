use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::{body::Body, http::StatusCode};

use crate::error::into_axum_response;
use crate::protocol::IngressApi;
use crate::state::AppState;

/// List the advertised models in `OpenAI` format.
#[must_use]
pub fn handler(State(state): State<Arc<AppState>>, headers: &HeaderMap) -> Response {
    const INGRESS: IngressApi = IngressApi::OpenAiChat;
    if let Err(err) = state.authenticate(headers) {
        return into_axum_response(&err, INGRESS);
    }

    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            axum::http::HeaderValue::from_static("application/json"),
        )],
        Body::from(state.models.list_body()),
    )
        .into_response()
}
