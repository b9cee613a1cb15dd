use std::convert::Infallible;

use axum::response::Response;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};

use crate::observability::metrics::{MeteredStream, RequestTimer};

#[inline]
fn sse_ok_response(body: axum::body::Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = http::StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(
        http::header::CACHE_CONTROL,
        http::HeaderValue::from_static("no-cache"),
    );
    headers.insert(
        http::header::CONNECTION,
        http::HeaderValue::from_static("keep-alive"),
    );
    response
}

/// Wrap an SSE frame stream into a `200 text/event-stream` response whose
/// metrics record is emitted when the body ends or the client goes away.
pub(crate) fn sse_streaming_response(
    frames: impl Stream<Item = Bytes> + Send + 'static,
    timer: RequestTimer,
) -> Response {
    let metered = MeteredStream::new(frames, timer, http::StatusCode::OK.as_u16());
    let body = axum::body::Body::from_stream(metered.map(Ok::<Bytes, Infallible>));
    sse_ok_response(body)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::observability::metrics::TracingMetricsSink;
    use crate::protocol::IngressApi;

    #[tokio::test]
    async fn sse_response_has_stream_headers() {
        let timer = RequestTimer::start(
            Arc::new(TracingMetricsSink),
            "/v1/chat/completions",
            "m",
            true,
            IngressApi::OpenAiChat,
        );
        let frames = futures_util::stream::iter([Bytes::from_static(b"data: [DONE]\n\n")]);
        let response = sse_streaming_response(frames, timer);
        assert_eq!(response.status(), http::StatusCode::OK);
        assert_eq!(
            response.headers()[http::header::CONTENT_TYPE],
            "text/event-stream"
        );
        assert_eq!(response.headers()[http::header::CACHE_CONTROL], "no-cache");
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"data: [DONE]\n\n");
    }
}
