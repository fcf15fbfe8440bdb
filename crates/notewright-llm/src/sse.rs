//! Server-sent events as JSON chunks, shared by the Gemini and Groq adapters.

use eventsource_stream::{Event, EventStreamError, Eventsource};
use futures_util::{future, Stream, StreamExt, TryStreamExt};
use log::debug;
use std::pin::Pin;

use crate::error::LlmError;

#[derive(Debug, Clone, PartialEq)]
pub enum SseEvent {
    Message(serde_json::Value),
    Done,
}

pub type SseStream = Pin<Box<dyn Stream<Item = Result<SseEvent, LlmError>> + Send>>;

/// Decodes the `data:` field of each event. `[DONE]` becomes
/// [`SseEvent::Done`]; payloads that are not JSON are dropped.
pub fn json_events<S>(bytes: S) -> SseStream
where
    S: Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
{
    let events = bytes
        .eventsource()
        .map_err(map_stream_error)
        .try_filter_map(|event| future::ready(Ok(decode_event(&event))));
    events.boxed()
}

fn decode_event(event: &Event) -> Option<SseEvent> {
    let data = event.data.trim();
    if data == "[DONE]" {
        return Some(SseEvent::Done);
    }
    match serde_json::from_str(data) {
        Ok(json) => Some(SseEvent::Message(json)),
        Err(e) => {
            debug!("Skipping non-JSON event payload ({}): {}", e, data);
            None
        }
    }
}

fn map_stream_error(err: EventStreamError<reqwest::Error>) -> LlmError {
    match err {
        EventStreamError::Transport(e) => LlmError::from(e),
        other => LlmError::Transport(format!("Malformed event stream: {}", other)),
    }
}
