use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use tokenpipe_protocol::BusEvent;
use tracing::warn;

use crate::api::error::ApiError;
use crate::api::AppState;
use crate::TokenpipeError;

#[derive(Debug, Serialize, Deserialize)]
pub struct PublishEventResponse {
    /// Subscriptions the event was handed to
    pub delivered: usize,
}

/// POST /api/events - Publish an event given in its `{kind, data}` wire form
///
/// Malformed events are logged and rejected; nothing reaches the bus.
pub async fn publish_event(
    State(state): State<AppState>,
    body: String,
) -> Result<Json<PublishEventResponse>, ApiError> {
    let event = BusEvent::from_json(&body).map_err(|e| {
        warn!(error = %e, "dropping malformed event");
        TokenpipeError::from(e)
    })?;

    let delivered = state.bus.publish(event);
    Ok(Json(PublishEventResponse { delivered }))
}
