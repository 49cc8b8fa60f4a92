//! Boardsync Core Library
//!
//! Event reconciliation for a kanban board mirrored from an upstream task
//! API. Changes arriving from local REST calls, the broadcast channel and
//! the upstream webhook feed are normalized into deltas, deduplicated and
//! reconciled into a single authoritative board store.

pub mod api;
pub mod board;
pub mod broadcast;
pub mod config;
pub mod dedup;
pub mod delta;
pub mod engine;
pub mod error;
pub mod optimistic;
pub mod reconcile;
pub mod runtime;
pub mod tombstone;

pub use api::{BoardSnapshot, MutationApi, MutationOutcome};
pub use board::{Board, BoardStore, Card, CardPatch, List, ListSnapshot, StoreChange};
pub use broadcast::{BroadcastEvent, CardUpdates};
pub use config::SyncConfig;
pub use delta::{Channel, CorrelationId, Delta, DeltaKind, RawEvent};
pub use engine::{Disposition, Resolution, Submitted, SyncEngine};
pub use error::{SyncError, SyncResult, TransportError};
pub use optimistic::Intent;
pub use runtime::{BoardHandle, BoardRuntime, SyncNotice};
