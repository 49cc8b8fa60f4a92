//! Centralized error types for the reconciliation engine.

use thiserror::Error;

use crate::delta::Channel;

/// Failure of an outbound call against the upstream task API.
///
/// Every `MutationApi` method reports failures with this type. It is never
/// retried automatically; a locally initiated mutation that fails is rolled
/// back by the optimistic tracker.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{operation} failed{}: {message}", status_suffix(.status))]
pub struct TransportError {
    pub operation: String,
    pub status: Option<u16>,
    pub message: String,
}

impl TransportError {
    /// Create a transport error without an HTTP status (connection refused, timeout, ...).
    pub fn new(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            status: None,
            message: message.into(),
        }
    }

    /// Create a transport error for a non-success upstream response.
    pub fn with_status(operation: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            status: Some(status),
            message: message.into(),
        }
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" ({s})")).unwrap_or_default()
}

/// What a stale reference pointed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    Card,
    List,
}

impl std::fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Card => f.write_str("card"),
            Self::List => f.write_str("list"),
        }
    }
}

/// Main error type for sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Malformed {channel} event: {reason}")]
    MalformedEvent { channel: Channel, reason: String },

    #[error("Stale reference to unknown {kind} '{id}'")]
    StaleReference { kind: ReferenceKind, id: String },

    #[error("Board runtime is no longer running")]
    RuntimeClosed,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

impl SyncError {
    /// Create a malformed event error.
    pub fn malformed(channel: Channel, reason: impl Into<String>) -> Self {
        Self::MalformedEvent {
            channel,
            reason: reason.into(),
        }
    }

    /// Create a stale reference error for a card id.
    pub fn stale_card(id: impl Into<String>) -> Self {
        Self::StaleReference {
            kind: ReferenceKind::Card,
            id: id.into(),
        }
    }

    /// Create a stale reference error for a list id.
    pub fn stale_list(id: impl Into<String>) -> Self {
        Self::StaleReference {
            kind: ReferenceKind::List,
            id: id.into(),
        }
    }

    /// Whether this error only means "nothing to do": the store is untouched
    /// and the next full fetch restores consistency.
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::StaleReference { .. })
    }
}
