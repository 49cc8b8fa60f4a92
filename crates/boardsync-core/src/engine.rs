//! The sync engine: one board's store plus everything that guards it.
//!
//! Every path into the store goes through here. Inbound events are
//! normalized, screened, deduplicated and reconciled; local intents are
//! applied optimistically and settled once upstream answers.

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::api::{BoardSnapshot, MutationOutcome};
use crate::board::{BoardStore, ListSnapshot, StoreChange};
use crate::broadcast::BroadcastEvent;
use crate::config::{window, SyncConfig};
use crate::dedup::{DedupFilter, PendingRemovals, Verdict};
use crate::delta::{normalize_broadcast, normalize_webhook, Channel, CorrelationId, Delta, DeltaKind, RawEvent};
use crate::error::{SyncResult, TransportError};
use crate::optimistic::{Intent, OptimisticTracker, PendingMutation, Settlement};
use crate::reconcile::reconcile;
use crate::tombstone::Tombstones;

/// What happened to one inbound event.
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    /// Reconciled; subscribers saw this change.
    Applied(StoreChange),
    /// Admitted but already reflected in the store.
    Unchanged,
    /// The normalizer produced no delta.
    Ignored,
    /// Same change already applied recently.
    Duplicate,
    /// The card was removed recently.
    Tombstoned,
    /// A later event in the same batch removes the card.
    Superseded,
    /// Named a card or list the store does not know.
    Stale,
}

/// A local intent that was applied optimistically.
#[derive(Debug, Clone, PartialEq)]
pub struct Submitted {
    pub correlation: CorrelationId,
    /// Placeholder id of an optimistically created card.
    pub provisional_id: Option<String>,
    pub change: Option<StoreChange>,
}

/// How a pending local mutation ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Upstream accepted it. `mirror` should be sent to other viewers.
    Confirmed {
        correlation: CorrelationId,
        change: Option<StoreChange>,
        mirror: BroadcastEvent,
    },
    /// Upstream accepted it after the local change had already been rolled
    /// back; its result was applied as an ordinary local delta.
    Late {
        correlation: CorrelationId,
        disposition: Disposition,
        mirror: BroadcastEvent,
    },
    /// Upstream rejected it and the local change was undone.
    RolledBack {
        correlation: CorrelationId,
        change: Option<StoreChange>,
        error: TransportError,
    },
    /// No answer arrived in time and the local change was undone.
    Expired {
        correlation: CorrelationId,
        change: Option<StoreChange>,
    },
    /// Nothing was pending under this id.
    Unknown { correlation: CorrelationId },
}

enum Staged {
    Ready(SyncResult<Option<Delta>>),
    Broadcast(BroadcastEvent),
}

/// Owns one board's state. Not shared: a single task drives it.
pub struct SyncEngine {
    config: SyncConfig,
    store: BoardStore,
    filter: DedupFilter,
    tombstones: Tombstones,
    tracker: OptimisticTracker,
}

impl SyncEngine {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            store: BoardStore::new(config.notify_capacity),
            filter: DedupFilter::new(window(config.dedup_retention)),
            tombstones: Tombstones::new(window(config.tombstone_ttl)),
            tracker: OptimisticTracker::new(window(config.pending_timeout)),
            config,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn store(&self) -> &BoardStore {
        &self.store
    }

    pub fn tracker(&self) -> &OptimisticTracker {
        &self.tracker
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.store.subscribe()
    }

    pub(crate) fn change_sender(&self) -> broadcast::Sender<StoreChange> {
        self.store.sender()
    }

    pub fn snapshot(&self) -> Vec<ListSnapshot> {
        self.store.snapshot()
    }

    /// Replace the store content with a full fetch.
    ///
    /// Cards under a live tombstone stay out. Mutations still pending are
    /// replayed on top so the user's unconfirmed changes stay visible.
    pub fn load(&mut self, snapshot: BoardSnapshot, now: DateTime<Utc>) -> StoreChange {
        let tombstones = &self.tombstones;
        let mut change = self
            .store
            .load(snapshot.lists, snapshot.cards, |id| tombstones.is_live(id, now));
        let replay: Vec<Delta> = self.tracker.pending().map(|p| p.provisional.clone()).collect();
        if !replay.is_empty() {
            for delta in &replay {
                if let Err(e) = reconcile(delta, &mut self.store, &mut self.tombstones, now) {
                    debug!(card_id = %delta.card_id(), error = %e, "Pending mutation no longer applies after reload");
                }
            }
            change = StoreChange {
                lists: self.store.snapshot(),
            };
        }
        info!(
            lists = self.store.lists().len(),
            cards = self.store.card_count(),
            replayed = replay.len(),
            "Board loaded"
        );
        change
    }

    /// Process one inbound event.
    pub fn ingest(&mut self, event: RawEvent, now: DateTime<Utc>) -> SyncResult<Disposition> {
        self.ingest_batch(vec![event], now)
            .pop()
            .unwrap_or(Ok(Disposition::Ignored))
    }

    /// Process events that were queued together, in order.
    ///
    /// An update or move whose card a later event of the batch removes is
    /// skipped. Returns one result per event; malformed events are errors.
    pub fn ingest_batch(&mut self, events: Vec<RawEvent>, now: DateTime<Utc>) -> Vec<SyncResult<Disposition>> {
        // Webhook translation and broadcast removals do not depend on the
        // store, so later removals are known before anything is applied.
        let staged: Vec<Staged> = events
            .into_iter()
            .map(|event| match event {
                RawEvent::Webhook(payload) => Staged::Ready(normalize_webhook(&payload)),
                RawEvent::Broadcast(event) => Staged::Broadcast(event),
            })
            .collect();

        let mut removals = PendingRemovals::default();
        for (position, staged) in staged.iter().enumerate() {
            match staged {
                Staged::Ready(Ok(Some(delta))) if delta.is_removal() => removals.note(position, delta.card_id()),
                Staged::Broadcast(
                    BroadcastEvent::CardDeleted { card_id } | BroadcastEvent::CardArchived { card_id },
                ) => removals.note(position, card_id),
                _ => {}
            }
        }

        staged
            .into_iter()
            .enumerate()
            .map(|(position, staged)| {
                let normalized = match staged {
                    Staged::Ready(result) => result,
                    Staged::Broadcast(event) => normalize_broadcast(&event, &self.store),
                };
                let delta = match normalized {
                    Ok(Some(delta)) => delta,
                    Ok(None) => return Ok(Disposition::Ignored),
                    Err(e) => {
                        warn!(error = %e, "Dropping malformed event");
                        return Err(e);
                    }
                };
                if removals.supersedes(position, &delta) {
                    debug!(
                        card_id = %delta.card_id(),
                        kind = %delta.tag(),
                        channel = %delta.channel,
                        "Superseded by a queued removal"
                    );
                    return Ok(Disposition::Superseded);
                }
                self.apply(&delta, now)
            })
            .collect()
    }

    /// Filter and reconcile one delta.
    pub fn apply(&mut self, delta: &Delta, now: DateTime<Utc>) -> SyncResult<Disposition> {
        match self.filter.admit(delta, &mut self.tombstones, now) {
            Verdict::Duplicate => {
                debug!(card_id = %delta.card_id(), kind = %delta.tag(), channel = %delta.channel, "Duplicate delta dropped");
                Ok(Disposition::Duplicate)
            }
            Verdict::Tombstoned => {
                debug!(card_id = %delta.card_id(), kind = %delta.tag(), channel = %delta.channel, "Delta for removed card dropped");
                Ok(Disposition::Tombstoned)
            }
            Verdict::Admit | Verdict::Supersede => self.reconcile(delta, now),
        }
    }

    fn reconcile(&mut self, delta: &Delta, now: DateTime<Utc>) -> SyncResult<Disposition> {
        match reconcile(delta, &mut self.store, &mut self.tombstones, now) {
            Ok(Some(change)) => {
                debug!(card_id = %delta.card_id(), kind = %delta.tag(), channel = %delta.channel, "Delta applied");
                Ok(Disposition::Applied(change))
            }
            Ok(None) => Ok(Disposition::Unchanged),
            Err(e) if e.is_stale() => {
                debug!(card_id = %delta.card_id(), channel = %delta.channel, error = %e, "Stale delta dropped");
                Ok(Disposition::Stale)
            }
            Err(e) => Err(e),
        }
    }

    /// Apply a local intent optimistically.
    ///
    /// The provisional delta is recorded as applied, so the upstream echo of
    /// the same change is recognised as a duplicate.
    pub fn submit(&mut self, intent: Intent, now: DateTime<Utc>) -> SyncResult<Submitted> {
        let pending = self.tracker.begin(intent, &self.store, now)?;
        let change = match reconcile(&pending.provisional, &mut self.store, &mut self.tombstones, now) {
            Ok(change) => change,
            Err(e) => {
                self.tracker.fail(pending.correlation);
                return Err(e);
            }
        };
        self.filter.record(&pending.provisional, now);
        debug!(
            correlation = %pending.correlation,
            operation = pending.intent.operation(),
            card_id = %pending.provisional.card_id(),
            "Optimistic change applied"
        );
        Ok(Submitted {
            correlation: pending.correlation,
            provisional_id: pending.provisional_id,
            change,
        })
    }

    /// Resolve a pending mutation with the upstream result.
    pub fn settle(
        &mut self,
        correlation: CorrelationId,
        result: Result<MutationOutcome, TransportError>,
        now: DateTime<Utc>,
    ) -> SyncResult<Resolution> {
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(error) => {
                let Some(pending) = self.tracker.fail(correlation) else {
                    debug!(correlation = %correlation, error = %error, "Failure for mutation no longer pending");
                    return Ok(Resolution::Unknown { correlation });
                };
                warn!(
                    correlation = %correlation,
                    operation = pending.intent.operation(),
                    error = %error,
                    "Upstream rejected local mutation, rolling back"
                );
                let change = self.compensate(&pending, now)?;
                return Ok(Resolution::RolledBack {
                    correlation,
                    change,
                    error,
                });
            }
        };

        let mirror = BroadcastEvent::from_outcome(&outcome);
        match self.tracker.confirm(correlation, &outcome) {
            Settlement::Confirmed { pending, delta } => {
                let change = self.confirm(&delta, now)?;
                debug!(correlation = %correlation, operation = pending.intent.operation(), "Local mutation confirmed");
                Ok(Resolution::Confirmed {
                    correlation,
                    change,
                    mirror,
                })
            }
            Settlement::Late { pending, delta } => {
                info!(
                    correlation = %correlation,
                    operation = pending.intent.operation(),
                    "Confirmation arrived after rollback, applying upstream result"
                );
                let disposition = self.apply(&delta, now)?;
                Ok(Resolution::Late {
                    correlation,
                    disposition,
                    mirror,
                })
            }
            Settlement::Unknown => {
                debug!(correlation = %correlation, "Confirmation for unknown mutation");
                Ok(Resolution::Unknown { correlation })
            }
        }
    }

    fn confirm(&mut self, delta: &Delta, now: DateTime<Utc>) -> SyncResult<Option<StoreChange>> {
        let DeltaKind::Rekeyed { provisional_id, card } = &delta.kind else {
            return Ok(match self.apply(delta, now)? {
                Disposition::Applied(change) => Some(change),
                _ => None,
            });
        };

        // Echoes of the upstream creation carry the confirmed id.
        self.filter
            .record(&Delta::created(card.clone(), None, Channel::Local), now);
        if self.tombstones.is_live(&card.id, now) {
            debug!(card_id = %card.id, "Confirmed card was already removed, dropping placeholder");
            self.filter.forget(provisional_id);
            let removal = Delta::deleted(provisional_id.clone(), Channel::Local);
            return self.reconcile_quietly(&removal, now);
        }
        self.filter.forget(provisional_id);
        self.reconcile_quietly(delta, now)
    }

    /// Undo an optimistic change. Bypasses the filter.
    fn compensate(&mut self, pending: &PendingMutation, now: DateTime<Utc>) -> SyncResult<Option<StoreChange>> {
        let compensation = &pending.compensation;
        self.filter.forget(compensation.card_id());
        self.tombstones.clear(compensation.card_id());
        self.reconcile_quietly(compensation, now)
    }

    fn reconcile_quietly(&mut self, delta: &Delta, now: DateTime<Utc>) -> SyncResult<Option<StoreChange>> {
        match self.reconcile(delta, now)? {
            Disposition::Applied(change) => Ok(Some(change)),
            _ => Ok(None),
        }
    }

    /// Roll back mutations past their deadline and prune expired state.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<Resolution> {
        let mut resolutions = Vec::new();
        for pending in self.tracker.expire(now) {
            warn!(
                correlation = %pending.correlation,
                operation = pending.intent.operation(),
                "Local mutation timed out, rolling back"
            );
            let change = match self.compensate(&pending, now) {
                Ok(change) => change,
                Err(e) => {
                    warn!(correlation = %pending.correlation, error = %e, "Rollback failed");
                    None
                }
            };
            resolutions.push(Resolution::Expired {
                correlation: pending.correlation,
                change,
            });
        }

        let seen = self.filter.prune(now);
        let stones = self.tombstones.prune(now);
        let forgotten = self.tracker.prune(now);
        if seen + stones + forgotten > 0 {
            debug!(seen, tombstones = stones, rolled_back = forgotten, "Pruned expired sync state");
        }
        resolutions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{Card, CardPatch, List};
    use crate::broadcast::CardUpdates;
    use serde_json::json;

    fn lists() -> Vec<List> {
        ["L1", "L2"]
            .iter()
            .enumerate()
            .map(|(i, id)| List {
                id: id.to_string(),
                name: id.to_string(),
                id_board: Some("B1".into()),
                pos: i as f64,
                closed: false,
            })
            .collect()
    }

    fn engine() -> SyncEngine {
        let mut engine = SyncEngine::new(SyncConfig::default());
        engine.load(
            BoardSnapshot {
                lists: lists(),
                cards: vec![Card::new("a", "L1", "A"), Card::new("b", "L1", "B")],
            },
            Utc::now(),
        );
        engine
    }

    fn webhook_move(card: &str, from: &str, to: &str) -> RawEvent {
        RawEvent::Webhook(json!({
            "action": { "type": "updateCard", "data": {
                "card": { "id": card, "idList": to },
                "old": { "idList": from },
                "listBefore": { "id": from },
                "listAfter": { "id": to } } }
        }))
    }

    #[test]
    fn local_move_suppresses_webhook_echo() {
        let mut engine = engine();
        let now = Utc::now();
        let sub = engine
            .submit(
                Intent::MoveCard {
                    card_id: "a".into(),
                    to_list_id: "L2".into(),
                    index: Some(0),
                },
                now,
            )
            .unwrap();
        assert!(sub.change.is_some());

        let resolution = engine
            .settle(sub.correlation, Ok(MutationOutcome::Moved(Card::new("a", "L2", "A"))), now)
            .unwrap();
        assert!(matches!(resolution, Resolution::Confirmed { change: None, .. }));

        let echo = engine.ingest(webhook_move("a", "L1", "L2"), now).unwrap();
        assert_eq!(echo, Disposition::Duplicate);
        assert_eq!(engine.store().locate("a"), Some(("L2", 0)));
    }

    #[test]
    fn failed_move_rolls_back() {
        let mut engine = engine();
        let now = Utc::now();
        let sub = engine
            .submit(
                Intent::MoveCard {
                    card_id: "b".into(),
                    to_list_id: "L2".into(),
                    index: None,
                },
                now,
            )
            .unwrap();
        let resolution = engine
            .settle(sub.correlation, Err(TransportError::with_status("moveCard", 500, "boom")), now)
            .unwrap();
        assert!(matches!(resolution, Resolution::RolledBack { change: Some(_), .. }));
        assert_eq!(engine.store().locate("b"), Some(("L1", 1)));
    }

    #[test]
    fn batch_skips_update_before_delete() {
        let mut engine = engine();
        let now = Utc::now();
        let results = engine.ingest_batch(
            vec![
                RawEvent::Broadcast(BroadcastEvent::CardUpdated {
                    card_id: "a".into(),
                    updates: CardUpdates {
                        name: Some("late".into()),
                        ..CardUpdates::default()
                    },
                }),
                RawEvent::Broadcast(BroadcastEvent::CardDeleted { card_id: "a".into() }),
            ],
            now,
        );
        assert!(matches!(results[0], Ok(Disposition::Superseded)));
        assert!(matches!(results[1], Ok(Disposition::Applied(_))));
        assert!(!engine.store().contains("a"));
    }

    #[test]
    fn malformed_event_does_not_touch_store() {
        let mut engine = engine();
        let before = engine.snapshot();
        let err = engine
            .ingest(RawEvent::Webhook(json!({ "action": { "type": "deleteCard", "data": {} } })), Utc::now())
            .unwrap_err();
        assert!(err.to_string().contains("Malformed webhook event"));
        assert_eq!(engine.snapshot(), before);
    }

    #[test]
    fn reload_keeps_removed_cards_out_and_replays_pending() {
        let mut engine = engine();
        let now = Utc::now();
        engine
            .ingest(RawEvent::Broadcast(BroadcastEvent::CardArchived { card_id: "a".into() }), now)
            .unwrap();
        engine
            .submit(
                Intent::UpdateCard {
                    card_id: "b".into(),
                    fields: CardPatch::name("pending"),
                },
                now,
            )
            .unwrap();

        engine.load(
            BoardSnapshot {
                lists: lists(),
                cards: vec![Card::new("a", "L1", "A"), Card::new("b", "L1", "B")],
            },
            now,
        );
        assert!(!engine.store().contains("a"));
        assert_eq!(engine.store().card("b").map(|c| c.name.as_str()), Some("pending"));
    }
}
