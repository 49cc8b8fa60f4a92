//! Board runtime: a single task that owns one [`SyncEngine`].
//!
//! Producers never touch the engine directly. They send commands over a
//! bounded queue; upstream calls run in spawned tasks whose results come
//! back through the same queue, so every store mutation happens on the
//! runtime task in arrival order.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::api::{execute, fetch_board, BoardSnapshot, MutationApi, MutationOutcome};
use crate::board::{ListSnapshot, StoreChange};
use crate::broadcast::BroadcastEvent;
use crate::config::{SyncConfig, MIN_PRUNE_INTERVAL};
use crate::delta::{CorrelationId, RawEvent};
use crate::engine::{Resolution, Submitted, SyncEngine};
use crate::error::{SyncError, SyncResult, TransportError};
use crate::optimistic::Intent;

/// Out-of-band news about local mutations, for the local UI and peers.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum SyncNotice {
    /// A local mutation succeeded upstream; forward to other viewers.
    Mirror(BroadcastEvent),
    /// Upstream rejected a local mutation and it was rolled back.
    MutationFailed { correlation: CorrelationId, message: String },
    /// A local mutation got no answer in time and was rolled back.
    RolledBack { correlation: CorrelationId },
}

enum Command {
    Inbound(RawEvent),
    Submit {
        intent: Intent,
        reply: oneshot::Sender<SyncResult<Submitted>>,
    },
    Settled {
        correlation: CorrelationId,
        result: Result<MutationOutcome, TransportError>,
    },
    Loaded(Result<BoardSnapshot, TransportError>),
    Reload,
    Snapshot {
        reply: oneshot::Sender<Vec<ListSnapshot>>,
    },
}

/// Cheap, cloneable entry point to a running board runtime.
#[derive(Clone)]
pub struct BoardHandle {
    board_id: Arc<str>,
    tx: mpsc::Sender<Command>,
    changes: broadcast::Sender<StoreChange>,
    notices: broadcast::Sender<SyncNotice>,
}

impl BoardHandle {
    pub fn board_id(&self) -> &str {
        &self.board_id
    }

    /// Apply `intent` optimistically and issue it upstream.
    ///
    /// Returns once the local change is applied; the upstream outcome is
    /// reported later through [`BoardHandle::notices`].
    pub async fn submit(&self, intent: Intent) -> SyncResult<Submitted> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Submit { intent, reply }).await?;
        rx.await.map_err(|_| SyncError::RuntimeClosed)?
    }

    pub async fn ingest_broadcast(&self, event: BroadcastEvent) -> SyncResult<()> {
        self.send(Command::Inbound(RawEvent::Broadcast(event))).await
    }

    pub async fn ingest_webhook(&self, payload: serde_json::Value) -> SyncResult<()> {
        self.send(Command::Inbound(RawEvent::Webhook(payload))).await
    }

    /// Refetch the whole board and replace the store content.
    pub async fn reload(&self) -> SyncResult<()> {
        self.send(Command::Reload).await
    }

    pub async fn snapshot(&self) -> SyncResult<Vec<ListSnapshot>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Snapshot { reply }).await?;
        rx.await.map_err(|_| SyncError::RuntimeClosed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }

    pub fn notices(&self) -> broadcast::Receiver<SyncNotice> {
        self.notices.subscribe()
    }

    async fn send(&self, command: Command) -> SyncResult<()> {
        self.tx.send(command).await.map_err(|_| SyncError::RuntimeClosed)
    }
}

/// The task that drives one board's engine.
pub struct BoardRuntime {
    board_id: Arc<str>,
    api: Arc<dyn MutationApi>,
    engine: SyncEngine,
    rx: mpsc::Receiver<Command>,
    // Weak so that dropping every handle stops the runtime.
    tx: mpsc::WeakSender<Command>,
    notices: broadcast::Sender<SyncNotice>,
}

impl BoardRuntime {
    /// Start the runtime for `board_id` and trigger the initial load.
    pub fn spawn(api: Arc<dyn MutationApi>, board_id: impl Into<String>, config: SyncConfig) -> BoardHandle {
        let board_id: Arc<str> = Arc::from(board_id.into());
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let (notices, _) = broadcast::channel(config.notify_capacity.max(1));
        let engine = SyncEngine::new(config);

        let handle = BoardHandle {
            board_id: board_id.clone(),
            tx: tx.clone(),
            changes: engine.change_sender(),
            notices: notices.clone(),
        };
        let runtime = Self {
            board_id,
            api,
            engine,
            rx,
            tx: tx.downgrade(),
            notices,
        };
        runtime.start_load();
        tokio::spawn(runtime.run());
        handle
    }

    async fn run(mut self) {
        info!(board_id = %self.board_id, "Board runtime started");
        let period = self.engine.config().prune_interval.max(MIN_PRUNE_INTERVAL);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let capacity = self.engine.config().queue_capacity;

        loop {
            tokio::select! {
                command = self.rx.recv() => {
                    let Some(first) = command else { break };
                    let mut commands = vec![first];
                    while commands.len() < capacity {
                        match self.rx.try_recv() {
                            Ok(next) => commands.push(next),
                            Err(_) => break,
                        }
                    }
                    self.handle_all(commands);
                }
                _ = ticker.tick() => self.tick(),
            }
        }
        info!(board_id = %self.board_id, "Board runtime stopped");
    }

    /// Handle drained commands in order, batching runs of inbound events.
    fn handle_all(&mut self, commands: Vec<Command>) {
        let mut inbound = Vec::new();
        for command in commands {
            match command {
                Command::Inbound(event) => inbound.push(event),
                other => {
                    self.flush(&mut inbound);
                    self.handle(other);
                }
            }
        }
        self.flush(&mut inbound);
    }

    fn flush(&mut self, inbound: &mut Vec<RawEvent>) {
        if inbound.is_empty() {
            return;
        }
        let events = std::mem::take(inbound);
        let count = events.len();
        // Malformed events are logged by the engine and otherwise dropped.
        let results = self.engine.ingest_batch(events, Utc::now());
        let failed = results.iter().filter(|r| r.is_err()).count();
        debug!(count, failed, "Processed inbound batch");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Inbound(event) => self.flush(&mut vec![event]),
            Command::Submit { intent, reply } => {
                let submitted = self.engine.submit(intent.clone(), Utc::now());
                if let Ok(sub) = &submitted {
                    self.start_mutation(sub.correlation, intent);
                }
                let _ = reply.send(submitted);
            }
            Command::Settled { correlation, result } => match self.engine.settle(correlation, result, Utc::now()) {
                Ok(resolution) => self.announce(resolution),
                Err(e) => warn!(correlation = %correlation, error = %e, "Failed to settle mutation"),
            },
            Command::Loaded(Ok(snapshot)) => {
                self.engine.load(snapshot, Utc::now());
            }
            Command::Loaded(Err(e)) => {
                warn!(board_id = %self.board_id, error = %e, "Board reload failed");
            }
            Command::Reload => self.start_load(),
            Command::Snapshot { reply } => {
                let _ = reply.send(self.engine.snapshot());
            }
        }
    }

    fn tick(&mut self) {
        for resolution in self.engine.tick(Utc::now()) {
            self.announce(resolution);
        }
    }

    fn announce(&self, resolution: Resolution) {
        let notice = match resolution {
            Resolution::Confirmed { mirror, .. } | Resolution::Late { mirror, .. } => SyncNotice::Mirror(mirror),
            Resolution::RolledBack { correlation, error, .. } => SyncNotice::MutationFailed {
                correlation,
                message: error.to_string(),
            },
            Resolution::Expired { correlation, .. } => SyncNotice::RolledBack { correlation },
            Resolution::Unknown { .. } => return,
        };
        let _ = self.notices.send(notice);
    }

    fn start_mutation(&self, correlation: CorrelationId, intent: Intent) {
        let Some(tx) = self.tx.upgrade() else { return };
        let api = self.api.clone();
        tokio::spawn(async move {
            let result = execute(api.as_ref(), &intent).await;
            if tx.send(Command::Settled { correlation, result }).await.is_err() {
                debug!(correlation = %correlation, "Runtime gone before mutation settled");
            }
        });
    }

    fn start_load(&self) {
        let Some(tx) = self.tx.upgrade() else { return };
        let api = self.api.clone();
        let board_id = self.board_id.clone();
        tokio::spawn(async move {
            let result = fetch_board(api.as_ref(), &board_id).await;
            let _ = tx.send(Command::Loaded(result)).await;
        });
    }
}
