use bytes::Bytes;
use futures_util::Stream;

use super::orchestrator::{PrimedUpstream, UpstreamBody};
use super::{ProtocolEmitter, StreamSession, UsageContext};

enum Phase {
    Start,
    Body,
    Done,
}

struct SseState<E> {
    upstream: UpstreamBody,
    session: Option<StreamSession>,
    first_deltas: Vec<String>,
    emitter: E,
    usage: UsageContext,
    phase: Phase,
}

/// Turn a primed upstream body into the client's SSE byte stream.
///
/// The opening frames carry the content already decoded from the first
/// chunk. Later frames are yielded in decode order as soon as they are
/// rendered. A failure after that becomes the emitter's in-band error and
/// ends the stream. Dropping the stream drops the upstream body.
pub fn sse_event_stream<E>(
    primed: PrimedUpstream,
    emitter: E,
    usage: UsageContext,
) -> impl Stream<Item = Bytes> + Send
where
    E: ProtocolEmitter + 'static,
{
    let (upstream, session, first_deltas) = primed.into_parts();
    let state = SseState {
        upstream,
        session: Some(session),
        first_deltas,
        emitter,
        usage,
        phase: Phase::Start,
    };

    futures_util::stream::unfold(state, |mut state| async move {
        loop {
            match state.phase {
                Phase::Start => {
                    state.phase = Phase::Body;
                    let mut frames = state.emitter.start().unwrap_or_default();
                    for delta in std::mem::take(&mut state.first_deltas) {
                        frames.push_str(&state.emitter.content(&delta));
                    }
                    if !frames.is_empty() {
                        return Some((Bytes::from(frames), state));
                    }
                }
                Phase::Body => {
                    if let Some(frames) = next_frames(&mut state).await {
                        if !frames.is_empty() {
                            return Some((Bytes::from(frames), state));
                        }
                    }
                }
                Phase::Done => return None,
            }
        }
    })
}

/// Render the frames for the next upstream step. `None` means the step
/// produced nothing to send.
async fn next_frames<E: ProtocolEmitter>(state: &mut SseState<E>) -> Option<String> {
    let Some(session) = state.session.as_mut() else {
        state.phase = Phase::Done;
        return None;
    };

    match state.upstream.next_chunk().await {
        Some(Ok(chunk)) => match session.feed(&chunk) {
            Ok(deltas) => {
                let mut out = String::new();
                for delta in &deltas {
                    out.push_str(&state.emitter.content(delta));
                }
                Some(out)
            }
            Err(err) => {
                state.phase = Phase::Done;
                state.emitter.error(&err.into())
            }
        },
        Some(Err(err)) => {
            state.phase = Phase::Done;
            state.emitter.error(&err)
        }
        None => {
            state.phase = Phase::Done;
            let session = state.session.take()?;
            match session.finish(&state.usage) {
                Ok(outcome) => {
                    state.usage.report(&outcome.usage);
                    Some(state.emitter.finish(&outcome))
                }
                Err(err) => state.emitter.error(&err.into()),
            }
        }
    }
}
