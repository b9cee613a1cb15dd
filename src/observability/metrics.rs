use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use futures_util::Stream;
use pin_project_lite::pin_project;

use crate::protocol::IngressApi;
use crate::usage::UsageEstimate;

/// One finished request, as reported to the metrics layer.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestRecord {
    pub endpoint: &'static str,
    pub status: u16,
    pub duration_ms: f64,
    pub model: String,
    pub is_stream: bool,
    pub api_type: IngressApi,
}

/// Token usage of one completed response.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenUsageRecord {
    pub model: String,
    pub usage: UsageEstimate,
}

/// Consumer of per-request records. Implementations must not block.
pub trait MetricsSink: Send + Sync {
    fn record_request(&self, record: RequestRecord);
    fn record_tokens(&self, record: TokenUsageRecord);
}

/// Default sink: one structured log line per request.
#[derive(Debug, Default)]
pub struct TracingMetricsSink;

impl MetricsSink for TracingMetricsSink {
    fn record_request(&self, record: RequestRecord) {
        tracing::info!(
            target: "kirogate::metrics",
            endpoint = record.endpoint,
            status = record.status,
            duration_ms = record.duration_ms,
            model = %record.model,
            is_stream = record.is_stream,
            api_type = record.api_type.as_str(),
            "request finished"
        );
    }

    fn record_tokens(&self, record: TokenUsageRecord) {
        tracing::debug!(
            target: "kirogate::metrics",
            model = %record.model,
            input_tokens = record.usage.prompt_tokens,
            output_tokens = record.usage.completion_tokens,
            "token usage"
        );
    }
}

/// Pending record for one request; emitted once via [`RequestTimer::finish`].
pub struct RequestTimer {
    sink: Arc<dyn MetricsSink>,
    endpoint: &'static str,
    model: String,
    is_stream: bool,
    api_type: IngressApi,
    started: Instant,
}

impl RequestTimer {
    #[must_use]
    pub fn start(
        sink: Arc<dyn MetricsSink>,
        endpoint: &'static str,
        model: &str,
        is_stream: bool,
        api_type: IngressApi,
    ) -> Self {
        Self {
            sink,
            endpoint,
            model: model.to_string(),
            is_stream,
            api_type,
            started: Instant::now(),
        }
    }

    /// Fill in the model and mode once the request body has been parsed.
    pub fn describe(&mut self, model: &str, is_stream: bool) {
        model.clone_into(&mut self.model);
        self.is_stream = is_stream;
    }

    #[must_use]
    pub fn started_at(&self) -> Instant {
        self.started
    }

    pub fn finish(self, status: u16) {
        let duration_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        self.sink.record_request(RequestRecord {
            endpoint: self.endpoint,
            status,
            duration_ms,
            model: self.model,
            is_stream: self.is_stream,
            api_type: self.api_type,
        });
    }
}

pin_project! {
    /// Body stream that reports its request when it ends or is dropped.
    pub struct MeteredStream<S> {
        #[pin]
        inner: S,
        timer: Option<RequestTimer>,
        status: u16,
    }

    impl<S> PinnedDrop for MeteredStream<S> {
        fn drop(this: Pin<&mut Self>) {
            let this = this.project();
            if let Some(timer) = this.timer.take() {
                timer.finish(*this.status);
            }
        }
    }
}

impl<S> MeteredStream<S> {
    pub fn new(inner: S, timer: RequestTimer, status: u16) -> Self {
        Self {
            inner,
            timer: Some(timer),
            status,
        }
    }
}

impl<S: Stream> Stream for MeteredStream<S> {
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        let polled = this.inner.poll_next(cx);
        if let Poll::Ready(None) = polled {
            if let Some(timer) = this.timer.take() {
                timer.finish(*this.status);
            }
        }
        polled
    }
}
