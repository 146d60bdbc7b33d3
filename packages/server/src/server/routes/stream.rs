//! SSE lifecycle stream.
//!
//! GET /events
//!
//! Forwards every lifecycle event from the engine's bus as an SSE event named
//! after the lifecycle event (`admitted`, `queued`, `completed`, ...), with
//! the envelope's sequence number as the SSE id.

use std::convert::Infallible;

use axum::{
    extract::Extension,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{self, StreamExt};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;

use crate::server::app::AppState;

pub async fn events_handler(
    Extension(state): Extension<AppState>,
) -> Sse<impl futures::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.engine.subscribe();

    // Stream with connected event and lag handling
    let connected = stream::once(async {
        Ok::<_, Infallible>(Event::default().event("connected").data("ok"))
    });

    let events = BroadcastStream::new(rx).filter_map(|result| async move {
        match result {
            Ok(envelope) => Event::default()
                .event(envelope.event.name())
                .id(envelope.seq.to_string())
                .json_data(&envelope)
                .ok()
                .map(Ok),
            Err(BroadcastStreamRecvError::Lagged(n)) => {
                tracing::warn!(missed = n, "event stream subscriber lagged");
                Event::default()
                    .event("lagged")
                    .json_data(serde_json::json!({ "missed": n }))
                    .ok()
                    .map(Ok)
            }
        }
    });

    Sse::new(connected.chain(events)).keep_alive(KeepAlive::default())
}
