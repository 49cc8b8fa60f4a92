//! Application state.

use std::sync::Arc;

use boardsync_core::{Board, BoardHandle, BroadcastEvent, CorrelationId, MutationApi, StoreChange, SyncNotice};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

/// Messages that only the server originates.
#[derive(Clone, Serialize, Debug, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    BoardCreated(Board),
    /// Raw upstream webhook body, relayed untouched.
    TrelloEvent(serde_json::Value),
    /// New content of the lists the hosted session just changed.
    ListsChanged(StoreChange),
    MutationFailed { correlation: CorrelationId, message: String },
    RolledBack { correlation: CorrelationId },
}

/// WebSocket message types.
///
/// Card events keep the exact shape of the broadcast channel so viewers can
/// feed them straight into their own engine.
#[derive(Clone, Serialize, Debug, PartialEq)]
#[serde(untagged)]
pub enum WireMessage {
    Card(BroadcastEvent),
    Server(ServerMessage),
}

impl From<BroadcastEvent> for WireMessage {
    fn from(event: BroadcastEvent) -> Self {
        Self::Card(event)
    }
}

impl From<ServerMessage> for WireMessage {
    fn from(message: ServerMessage) -> Self {
        Self::Server(message)
    }
}

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub api: Arc<dyn MutationApi>,
    pub tx: broadcast::Sender<WireMessage>,
    /// Reconciliation session for one board, when the server hosts one.
    pub sync: Option<BoardHandle>,
}

impl AppState {
    pub fn new(api: Arc<dyn MutationApi>) -> Self {
        let (tx, _rx) = broadcast::channel(100);
        Self { api, tx, sync: None }
    }

    pub fn with_sync(mut self, handle: BoardHandle) -> Self {
        self.sync = Some(handle);
        self
    }

    /// Broadcast a message to all WebSocket clients.
    pub fn broadcast(&self, msg: impl Into<WireMessage>) {
        let _ = self.tx.send(msg.into());
    }

    /// Mirror a card change to WebSocket clients and the hosted session.
    pub async fn publish(&self, event: BroadcastEvent) {
        if let Some(sync) = &self.sync {
            if let Err(e) = sync.ingest_broadcast(event.clone()).await {
                debug!(error = %e, "Hosted session did not take broadcast event");
            }
        }
        self.broadcast(event);
    }

    /// Relay hosted-session store changes and notices to WebSocket clients.
    pub fn spawn_relay(&self) {
        let Some(sync) = &self.sync else { return };
        let mut changes = sync.subscribe();
        let mut notices = sync.notices();

        let tx = self.tx.clone();
        tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(change) => {
                        let _ = tx.send(ServerMessage::ListsChanged(change).into());
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Store change relay lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        let tx = self.tx.clone();
        tokio::spawn(async move {
            loop {
                let message: WireMessage = match notices.recv().await {
                    Ok(SyncNotice::Mirror(event)) => event.into(),
                    Ok(SyncNotice::MutationFailed { correlation, message }) => {
                        ServerMessage::MutationFailed { correlation, message }.into()
                    }
                    Ok(SyncNotice::RolledBack { correlation }) => ServerMessage::RolledBack { correlation }.into(),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Notice relay lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let _ = tx.send(message);
            }
        });
    }
}
