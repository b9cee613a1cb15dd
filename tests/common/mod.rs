#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use bytes::Bytes;
use futures_util::StreamExt;
use kirogate::config::AppConfig;
use kirogate::observability::metrics::{MetricsSink, RequestRecord, TokenUsageRecord};
use kirogate::eventstream::encode_event_frame;
use kirogate::routing::dispatch::dispatch_request;
use kirogate::state::AppState;
use parking_lot::Mutex;
use serde_json::{json, Value};

pub const CLIENT_KEY: &str = "client-key";

/// How the mock `generateAssistantResponse` endpoint answers one call.
#[derive(Clone)]
pub enum Reply {
    Frames(Vec<u8>),
    /// Body chunks sent one at a time with a short pause before each later one.
    Chunks(Vec<Vec<u8>>),
    Status(StatusCode, String),
    /// Send the response head, then never produce a body chunk.
    Stall,
}

#[derive(Default)]
pub struct Recorder {
    pub generate_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    pub refresh_tokens: Mutex<Vec<String>>,
    pub authorizations: Mutex<Vec<String>>,
    pub payloads: Mutex<Vec<Value>>,
    replies: Mutex<Vec<Reply>>,
}

impl Recorder {
    /// Replies are consumed in order; the last one repeats.
    fn next_reply(&self) -> Reply {
        let mut replies = self.replies.lock();
        if replies.len() > 1 {
            replies.remove(0)
        } else {
            replies
                .first()
                .cloned()
                .unwrap_or_else(|| Reply::Frames(Vec::new()))
        }
    }
}

pub struct MockKiro {
    pub addr: SocketAddr,
    pub recorder: Arc<Recorder>,
    server: tokio::task::JoinHandle<()>,
}

impl Drop for MockKiro {
    fn drop(&mut self) {
        self.server.abort();
    }
}

pub async fn spawn_mock(replies: Vec<Reply>) -> MockKiro {
    let recorder = Arc::new(Recorder {
        replies: Mutex::new(replies),
        ..Recorder::default()
    });
    let app = Router::new()
        .route("/refreshToken", post(refresh))
        .route("/generateAssistantResponse", post(generate))
        .with_state(Arc::clone(&recorder));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock upstream");
    let addr = listener.local_addr().expect("local addr");
    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    MockKiro {
        addr,
        recorder,
        server,
    }
}

async fn refresh(State(recorder): State<Arc<Recorder>>, Json(body): Json<Value>) -> Json<Value> {
    let call = recorder.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
    if let Some(token) = body["refreshToken"].as_str() {
        recorder.refresh_tokens.lock().push(token.to_string());
    }
    Json(json!({
        "accessToken": format!("access-{call}"),
        "expiresIn": 3600,
        "profileArn": "arn:aws:codewhisperer:us-east-1:000000000000:profile/TEST",
    }))
}

async fn generate(
    State(recorder): State<Arc<Recorder>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    recorder.generate_calls.fetch_add(1, Ordering::SeqCst);
    if let Some(auth) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
        recorder.authorizations.lock().push(auth.to_string());
    }
    recorder.payloads.lock().push(body);

    match recorder.next_reply() {
        Reply::Frames(frames) => (
            [("content-type", "application/vnd.amazon.eventstream")],
            Body::from(frames),
        )
            .into_response(),
        Reply::Chunks(chunks) => {
            let body = futures_util::stream::iter(chunks.into_iter().enumerate()).then(
                |(index, chunk)| async move {
                    if index > 0 {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                    Ok::<Bytes, std::io::Error>(Bytes::from(chunk))
                },
            );
            (
                [("content-type", "application/vnd.amazon.eventstream")],
                Body::from_stream(body),
            )
                .into_response()
        }
        Reply::Status(status, text) => (status, text).into_response(),
        Reply::Stall => Body::from_stream(futures_util::stream::pending::<
            Result<Bytes, std::io::Error>,
        >())
        .into_response(),
    }
}

/// Gateway config pointed at the mock, with short retry delays.
pub fn config_for(mock: &MockKiro) -> AppConfig {
    let mut config = AppConfig::with_credentials(CLIENT_KEY, "global-refresh-token");
    config.kiro.api_base_url = Some(format!("http://{}", mock.addr));
    config.kiro.refresh_url = Some(format!("http://{}/refreshToken", mock.addr));
    config.kiro.base_retry_delay_ms = 5;
    config.streaming.first_token_timeout_secs = 2.0;
    config.streaming.first_token_max_retries = 2;
    config
}

pub fn state_for(config: AppConfig) -> Arc<AppState> {
    Arc::new(AppState::new(config).expect("build state"))
}

/// Metrics sink that keeps every record it receives.
#[derive(Default)]
pub struct RecordingSink {
    pub requests: Mutex<Vec<RequestRecord>>,
    pub tokens: Mutex<Vec<TokenUsageRecord>>,
}

impl MetricsSink for RecordingSink {
    fn record_request(&self, record: RequestRecord) {
        self.requests.lock().push(record);
    }

    fn record_tokens(&self, record: TokenUsageRecord) {
        self.tokens.lock().push(record);
    }
}

pub fn state_with_sink(config: AppConfig, sink: Arc<RecordingSink>) -> Arc<AppState> {
    Arc::new(AppState::with_metrics_sink(config, sink).expect("build state"))
}

pub fn content_frame(text: &str) -> Vec<u8> {
    encode_event_frame(
        "assistantResponseEvent",
        json!({ "content": text }).to_string().as_bytes(),
    )
}

pub fn tool_frames(id: &str, name: &str, input: &str) -> Vec<u8> {
    let mut out = encode_event_frame(
        "toolUseEvent",
        json!({ "name": name, "toolUseId": id, "input": input })
            .to_string()
            .as_bytes(),
    );
    out.extend(encode_event_frame(
        "toolUseEvent",
        json!({ "name": name, "toolUseId": id, "stop": true })
            .to_string()
            .as_bytes(),
    ));
    out
}

pub fn context_usage_frame(percentage: f64) -> Vec<u8> {
    encode_event_frame(
        "contextUsageEvent",
        json!({ "contextUsagePercentage": percentage })
            .to_string()
            .as_bytes(),
    )
}

pub async fn send(
    state: Arc<AppState>,
    method: &str,
    uri: &str,
    api_key: Option<&str>,
    body: Option<Value>,
) -> Response {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(key) = api_key {
        builder = builder.header("authorization", format!("Bearer {key}"));
    }
    let body = match body {
        Some(value) => {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&value).expect("serialize request"))
        }
        None => Body::empty(),
    };
    let request = builder.body(body).expect("build request");
    dispatch_request(state, Arc::<str>::from(""), request)
        .await
        .expect("dispatch")
}

pub async fn body_bytes(response: Response) -> Bytes {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body")
}

pub async fn body_json(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).expect("json body")
}

/// `data:` payloads of an `OpenAI` SSE body, `[DONE]` included verbatim.
pub fn openai_sse_data(body: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(body)
        .split("\n\n")
        .filter_map(|frame| frame.strip_prefix("data: "))
        .map(str::to_string)
        .collect()
}

/// `(event, data)` pairs of an Anthropic SSE body.
pub fn anthropic_sse_events(body: &[u8]) -> Vec<(String, Value)> {
    String::from_utf8_lossy(body)
        .split("\n\n")
        .filter(|frame| !frame.trim().is_empty())
        .filter_map(|frame| {
            let mut lines = frame.lines();
            let event = lines.next()?.strip_prefix("event: ")?.to_string();
            let data = lines.next()?.strip_prefix("data: ")?;
            Some((event, serde_json::from_str(data).ok()?))
        })
        .collect()
}
