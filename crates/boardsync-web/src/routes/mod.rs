//! Route handlers.

pub mod boards;
pub mod sync;
pub mod tasks;
pub mod webhook;

use axum::http::StatusCode;
use boardsync_core::TransportError;
use tracing::warn;

/// Handler error: status plus a plain-text message.
pub type ApiError = (StatusCode, String);

/// Upstream failures surface as 502 with the upstream's own message.
pub(crate) fn upstream_error(error: TransportError) -> ApiError {
    warn!(error = %error, "Upstream call failed");
    (StatusCode::BAD_GATEWAY, error.to_string())
}

pub(crate) fn bad_request(message: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, message.to_string())
}

/// Liveness text.
pub async fn index() -> &'static str {
    "Trello real-time API backend is running"
}
