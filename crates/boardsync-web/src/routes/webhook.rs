//! Upstream webhook receiver.

use axum::{extract::State, Json};
use tracing::{debug, warn};

use crate::state::{AppState, ServerMessage};

/// Answer the upstream service's verification probe.
pub async fn verify() -> &'static str {
    "Webhook OK"
}

/// Accept an action delivery, relay it to viewers and feed the hosted session.
pub async fn receive(State(state): State<AppState>, Json(event): Json<serde_json::Value>) -> &'static str {
    let action_type = event
        .pointer("/action/type")
        .and_then(|t| t.as_str())
        .unwrap_or("unknown");
    debug!(action_type, "Received webhook delivery");

    if let Some(sync) = &state.sync {
        if let Err(e) = sync.ingest_webhook(event.clone()).await {
            warn!(error = %e, "Hosted session did not take webhook event");
        }
    }
    state.broadcast(ServerMessage::TrelloEvent(event));
    "OK"
}
