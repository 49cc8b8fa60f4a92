//! Hosted reconciliation session endpoints.

use axum::{extract::State, http::StatusCode, Json};
use boardsync_core::{BoardHandle, CorrelationId, Intent, ListSnapshot, SyncError};
use serde::Serialize;

use super::ApiError;
use crate::state::AppState;

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct IntentAccepted {
    pub correlation: CorrelationId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provisional_id: Option<String>,
}

fn session(state: &AppState) -> Result<&BoardHandle, ApiError> {
    state
        .sync
        .as_ref()
        .ok_or_else(|| (StatusCode::NOT_FOUND, "No board sync session is running".to_string()))
}

fn sync_error(error: SyncError) -> ApiError {
    let status = match &error {
        SyncError::StaleReference { .. } => StatusCode::NOT_FOUND,
        SyncError::MalformedEvent { .. } | SyncError::Json(_) => StatusCode::BAD_REQUEST,
        SyncError::Transport(_) => StatusCode::BAD_GATEWAY,
        SyncError::RuntimeClosed => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, error.to_string())
}

/// Current content of every list in the hosted board.
pub async fn lists(State(state): State<AppState>) -> Result<Json<Vec<ListSnapshot>>, ApiError> {
    let snapshot = session(&state)?.snapshot().await.map_err(sync_error)?;
    Ok(Json(snapshot))
}

/// Apply an intent optimistically; its outcome arrives over the WebSocket.
pub async fn submit_intent(
    State(state): State<AppState>,
    Json(intent): Json<Intent>,
) -> Result<(StatusCode, Json<IntentAccepted>), ApiError> {
    let submitted = session(&state)?.submit(intent).await.map_err(sync_error)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(IntentAccepted {
            correlation: submitted.correlation,
            provisional_id: submitted.provisional_id,
        }),
    ))
}
