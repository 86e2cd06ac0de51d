use std::convert::Infallible;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::stream::{self, Stream, StreamExt};

use crate::api::AppState;
use crate::chat::StreamUpdate;

/// GET /api/stream - Live token updates as Server-Sent Events
///
/// Emits `connected` first, then `update` per token (id = token cursor) and
/// `finished` per generation. `close` is sent once the delivery queue shuts.
/// Concurrent connections share one queue, so each update reaches one of them.
pub async fn stream_updates(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    tracing::info!("SSE connection established");

    let connected = stream::once(async {
        Ok(Event::default()
            .event("connected")
            .data("Connection established"))
    });

    let updates = stream::unfold(state.updates.clone(), |updates| async move {
        let next = updates.lock().await.recv().await;
        next.map(|update| (Ok(to_event(&update)), updates))
    });

    let closed = stream::once(async {
        tracing::info!("delivery queue closed, ending SSE stream");
        Ok(Event::default().event("close").data("Stream completed"))
    });

    Sse::new(connected.chain(updates).chain(closed)).keep_alive(KeepAlive::default())
}

fn to_event(update: &StreamUpdate) -> Event {
    match update {
        StreamUpdate::Token { cursor, text, .. } => Event::default()
            .event("update")
            .id(cursor.to_string())
            // SSE data may not carry carriage returns
            .data(text.replace('\r', "")),
        StreamUpdate::Finished { .. } => {
            let data = serde_json::to_string(update).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "failed to encode finished update");
                String::from("{}")
            });
            Event::default().event("finished").data(data)
        }
    }
}
