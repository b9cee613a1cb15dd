pub mod orchestrator;
pub mod sse;

pub use orchestrator::{collect_outcome, open_upstream, PrimedUpstream, TimeoutPolicy, UpstreamBody};
pub use sse::sse_event_stream;

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;

use crate::error::GatewayError;
use crate::eventstream::{DecodedEvent, FrameDecodeError, FrameDecoder};
use crate::observability::log_request_complete;
use crate::observability::metrics::{MetricsSink, TokenUsageRecord};
use crate::toolcall::{dedupe_tool_calls, extract_bracket_tool_calls, ToolCall, ToolCallAccumulator};
use crate::usage::{estimate_usage, UsageEstimate};

/// Renders one client protocol's SSE text from upstream events.
///
/// Emitters hold only rendering state; they never see HTTP framing.
pub trait ProtocolEmitter: Send {
    /// Frames sent before any upstream content, if the protocol has any.
    fn start(&mut self) -> Option<String>;
    /// Frames for one content delta.
    fn content(&mut self, text: &str) -> String;
    /// Terminal frames. Later calls return an empty string.
    fn finish(&mut self, outcome: &StreamOutcome) -> String;
    /// In-band error frames for a failure after the stream started.
    fn error(&mut self, err: &GatewayError) -> Option<String>;
}

/// Everything known once the upstream response has ended.
#[derive(Debug, Clone)]
pub struct StreamOutcome {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: UsageEstimate,
    pub metering: Option<Value>,
    /// The upstream body ended without a single byte.
    pub upstream_empty: bool,
}

/// Inputs for usage estimation, plus where the final usage is reported.
#[derive(Clone)]
pub struct UsageContext {
    pub model: String,
    pub max_input_tokens: u64,
    pub local_prompt_tokens: u64,
    pub started: Instant,
    pub metrics: Arc<dyn MetricsSink>,
}

impl UsageContext {
    /// Log the completed request and hand its token usage to the metrics sink.
    pub fn report(&self, usage: &UsageEstimate) {
        log_request_complete(&self.model, usage, self.started);
        self.metrics.record_tokens(TokenUsageRecord {
            model: self.model.clone(),
            usage: *usage,
        });
    }
}

/// Request-local decode state for one upstream attempt.
///
/// Bytes go in through [`StreamSession::feed`], content deltas come out in
/// arrival order. Tool fragments, metering and context usage are kept
/// until [`StreamSession::finish`].
pub struct StreamSession {
    decoder: FrameDecoder,
    events: Vec<DecodedEvent>,
    content: String,
    tool_calls: ToolCallAccumulator,
    context_usage_pct: Option<f64>,
    metering: Option<Value>,
    received_bytes: bool,
}

impl Default for StreamSession {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamSession {
    #[must_use]
    pub fn new() -> Self {
        Self {
            decoder: FrameDecoder::new(),
            events: Vec::with_capacity(8),
            content: String::new(),
            tool_calls: ToolCallAccumulator::new(),
            context_usage_pct: None,
            metering: None,
            received_bytes: false,
        }
    }

    /// Decode a chunk and return the content deltas it completed.
    ///
    /// # Errors
    ///
    /// Returns the decoder's error; the session must not be fed again.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<String>, FrameDecodeError> {
        if !chunk.is_empty() {
            self.received_bytes = true;
        }
        self.events.clear();
        self.decoder.feed_into(chunk, &mut self.events)?;

        let mut deltas = Vec::new();
        for event in self.events.drain(..) {
            match event {
                DecodedEvent::Content { text } => {
                    self.content.push_str(&text);
                    deltas.push(text);
                }
                DecodedEvent::ToolCallFragment {
                    id,
                    name,
                    arguments_chunk,
                    stop,
                } => {
                    self.tool_calls.push_fragment(
                        id.as_deref(),
                        name.as_deref(),
                        &arguments_chunk,
                        stop,
                    );
                }
                DecodedEvent::Usage { metering } => self.metering = Some(metering),
                DecodedEvent::ContextUsage { percentage } => {
                    self.context_usage_pct = Some(percentage);
                }
            }
        }
        Ok(deltas)
    }

    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Close the session: merge native and bracket tool calls and compute usage.
    ///
    /// # Errors
    ///
    /// Returns [`FrameDecodeError::Truncated`] when the body stopped inside a frame.
    pub fn finish(self, usage: &UsageContext) -> Result<StreamOutcome, FrameDecodeError> {
        self.decoder.finish()?;

        let native = self.tool_calls.finish();
        let bracket = extract_bracket_tool_calls(&self.content);
        if !bracket.is_empty() {
            tracing::debug!(
                native = native.len(),
                bracket = bracket.len(),
                "recovered tool calls from content"
            );
        }
        let tool_calls = dedupe_tool_calls(native, bracket);
        let estimate = estimate_usage(
            &self.content,
            self.context_usage_pct,
            usage.max_input_tokens,
            usage.local_prompt_tokens,
        );

        Ok(StreamOutcome {
            content: self.content,
            tool_calls,
            usage: estimate,
            metering: self.metering,
            upstream_empty: !self.received_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eventstream::encode_event_frame;
    use crate::usage::UsageSource;

    fn usage_context() -> UsageContext {
        UsageContext {
            model: "claude-sonnet-4".into(),
            max_input_tokens: 200_000,
            local_prompt_tokens: 10,
            started: Instant::now(),
            metrics: Arc::new(crate::observability::metrics::TracingMetricsSink),
        }
    }

    fn frame(event_type: &str, payload: serde_json::Value) -> Vec<u8> {
        encode_event_frame(event_type, payload.to_string().as_bytes())
    }

    #[test]
    fn content_survives_arbitrary_chunking() {
        let mut bytes = frame("assistantResponseEvent", serde_json::json!({"content": "Hel"}));
        bytes.extend(frame("assistantResponseEvent", serde_json::json!({"content": "lo!"})));

        for split in [1, 7, 20, bytes.len() - 1] {
            let mut session = StreamSession::new();
            let mut deltas = session.feed(&bytes[..split]).unwrap();
            deltas.extend(session.feed(&bytes[split..]).unwrap());
            assert_eq!(deltas.concat(), "Hello!");
            let outcome = session.finish(&usage_context()).unwrap();
            assert_eq!(outcome.content, "Hello!");
            assert!(!outcome.upstream_empty);
        }
    }

    #[test]
    fn native_and_bracket_calls_are_merged() {
        let mut session = StreamSession::new();
        let mut bytes = frame(
            "assistantResponseEvent",
            serde_json::json!({"content": "[Called lookup with args: {\"q\":\"x\"}]"}),
        );
        bytes.extend(frame(
            "toolUseEvent",
            serde_json::json!({"name": "lookup", "toolUseId": "t1", "input": "{\"q\":\"x\"}"}),
        ));
        bytes.extend(frame(
            "toolUseEvent",
            serde_json::json!({"toolUseId": "t1", "stop": true}),
        ));
        session.feed(&bytes).unwrap();

        let outcome = session.finish(&usage_context()).unwrap();
        assert_eq!(outcome.tool_calls.len(), 1);
        assert_eq!(outcome.tool_calls[0].id.as_deref(), Some("t1"));
        assert_eq!(outcome.tool_calls[0].arguments, r#"{"q":"x"}"#);
    }

    #[test]
    fn context_usage_and_metering_reach_the_outcome() {
        let mut session = StreamSession::new();
        let mut bytes = frame("assistantResponseEvent", serde_json::json!({"content": "abcd"}));
        bytes.extend(frame("meteringEvent", serde_json::json!({"usage": 0.25})));
        bytes.extend(frame(
            "contextUsageEvent",
            serde_json::json!({"contextUsagePercentage": 1.0}),
        ));
        session.feed(&bytes).unwrap();

        let outcome = session.finish(&usage_context()).unwrap();
        assert_eq!(outcome.usage.total_tokens, 2000);
        assert_eq!(outcome.usage.prompt_source, UsageSource::ApiDerived);
        assert_eq!(outcome.metering, Some(serde_json::json!(0.25)));
    }

    #[test]
    fn empty_body_is_flagged() {
        let outcome = StreamSession::new().finish(&usage_context()).unwrap();
        assert!(outcome.upstream_empty);
        assert_eq!(outcome.usage.prompt_tokens, 10);
    }

    #[test]
    fn truncated_frame_fails_finish() {
        let bytes = frame("assistantResponseEvent", serde_json::json!({"content": "x"}));
        let mut session = StreamSession::new();
        session.feed(&bytes[..bytes.len() - 2]).unwrap();
        assert!(matches!(
            session.finish(&usage_context()),
            Err(FrameDecodeError::Truncated { .. })
        ));
    }
}
