//! Optimistic mutation tracker.
//!
//! A local intent is applied to the store immediately as a provisional
//! delta. The tracker remembers how to undo it until the upstream call
//! settles: success confirms the guess, failure or timeout applies the
//! compensating delta.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::MutationOutcome;
use crate::board::{BoardStore, Card, CardPatch};
use crate::delta::{normalize_rest, Channel, CorrelationId, Delta, DeltaKind};
use crate::error::{SyncError, SyncResult};

/// Prefix of placeholder ids given to optimistically created cards.
pub const PROVISIONAL_PREFIX: &str = "local-";

/// A mutation requested by the local user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Intent {
    CreateCard {
        list_id: String,
        name: String,
        #[serde(default)]
        desc: Option<String>,
    },
    MoveCard {
        card_id: String,
        to_list_id: String,
        #[serde(default)]
        index: Option<usize>,
    },
    UpdateCard { card_id: String, fields: CardPatch },
    ArchiveCard { card_id: String },
    DeleteCard { card_id: String },
}

impl Intent {
    /// Upstream operation name, used in logs and transport errors.
    pub fn operation(&self) -> &'static str {
        match self {
            Self::CreateCard { .. } => "createCard",
            Self::MoveCard { .. } => "moveCard",
            Self::UpdateCard { .. } => "updateCard",
            Self::ArchiveCard { .. } => "archiveCard",
            Self::DeleteCard { .. } => "deleteCard",
        }
    }
}

/// A local mutation applied to the store but not yet settled upstream.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMutation {
    pub correlation: CorrelationId,
    pub intent: Intent,
    /// What was applied optimistically.
    pub provisional: Delta,
    /// What exactly reverses `provisional`.
    pub compensation: Delta,
    /// Owning list before the change, for moves.
    pub from_list_id: Option<String>,
    /// Placeholder id of an optimistically created card.
    pub provisional_id: Option<String>,
    pub deadline: DateTime<Utc>,
}

/// How a settled upstream response relates to the tracked mutations.
#[derive(Debug, Clone, PartialEq)]
pub enum Settlement {
    /// The pending entry was found; `delta` is the confirming delta.
    Confirmed { pending: PendingMutation, delta: Delta },
    /// The entry had already timed out and been rolled back; `delta` is the
    /// upstream truth and should be admitted as an ordinary local delta.
    Late { pending: PendingMutation, delta: Delta },
    /// Nothing is known about this correlation id.
    Unknown,
}

/// Tracks optimistic mutations by correlation id.
#[derive(Debug, Clone)]
pub struct OptimisticTracker {
    timeout: Duration,
    pending: HashMap<CorrelationId, PendingMutation>,
    rolled_back: HashMap<CorrelationId, (PendingMutation, DateTime<Utc>)>,
}

impl OptimisticTracker {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            pending: HashMap::new(),
            rolled_back: HashMap::new(),
        }
    }

    /// Build and register the provisional and compensating deltas for `intent`.
    ///
    /// Intents naming a card or list the store does not know are rejected
    /// before anything is applied or sent.
    pub fn begin(&mut self, intent: Intent, store: &BoardStore, now: DateTime<Utc>) -> SyncResult<PendingMutation> {
        let correlation = CorrelationId::new();
        let mut from_list_id = None;
        let mut provisional_id = None;

        let (provisional, compensation) = match &intent {
            Intent::CreateCard { list_id, name, desc } => {
                if !store.has_list(list_id) {
                    return Err(SyncError::stale_list(list_id));
                }
                let id = format!("{PROVISIONAL_PREFIX}{}", Uuid::new_v4());
                let card = Card {
                    id: id.clone(),
                    name: name.clone(),
                    desc: desc.clone(),
                    id_list: list_id.clone(),
                    pos: None,
                    closed: false,
                };
                provisional_id = Some(id.clone());
                (
                    Delta::created(card, None, Channel::Local),
                    Delta::deleted(id, Channel::Local),
                )
            }
            Intent::MoveCard {
                card_id,
                to_list_id,
                index,
            } => {
                if !store.has_list(to_list_id) {
                    return Err(SyncError::stale_list(to_list_id));
                }
                let (from, at) = store
                    .locate(card_id)
                    .map(|(l, i)| (l.to_string(), i))
                    .ok_or_else(|| SyncError::stale_card(card_id))?;
                from_list_id = Some(from.clone());
                (
                    Delta::moved(card_id.clone(), Some(from.clone()), to_list_id.clone(), *index, Channel::Local),
                    Delta::moved(card_id.clone(), Some(to_list_id.clone()), from, Some(at), Channel::Local),
                )
            }
            Intent::UpdateCard { card_id, fields } => {
                let card = store.card(card_id).ok_or_else(|| SyncError::stale_card(card_id))?;
                (
                    Delta::updated(card_id.clone(), fields.clone(), Channel::Local),
                    Delta::updated(card_id.clone(), fields.read_from(card), Channel::Local),
                )
            }
            Intent::ArchiveCard { card_id } | Intent::DeleteCard { card_id } => {
                let (card, at) = store
                    .locate(card_id)
                    .and_then(|(_, i)| store.card(card_id).map(|c| (c.clone(), i)))
                    .ok_or_else(|| SyncError::stale_card(card_id))?;
                let removal = if matches!(intent, Intent::ArchiveCard { .. }) {
                    Delta::archived(card_id.clone(), Channel::Local)
                } else {
                    Delta::deleted(card_id.clone(), Channel::Local)
                };
                (removal, Delta::created(card, Some(at), Channel::Local))
            }
        };

        let pending = PendingMutation {
            correlation,
            intent,
            provisional: provisional.with_correlation(correlation),
            compensation: compensation.with_correlation(correlation),
            from_list_id,
            provisional_id,
            deadline: now + self.timeout,
        };
        self.pending.insert(correlation, pending.clone());
        Ok(pending)
    }

    /// Settle a successful upstream response.
    pub fn confirm(&mut self, correlation: CorrelationId, outcome: &MutationOutcome) -> Settlement {
        if let Some(pending) = self.pending.remove(&correlation) {
            let mut delta = normalize_rest(outcome, &pending.intent, pending.from_list_id.as_deref())
                .with_correlation(correlation);
            if let (Some(provisional_id), DeltaKind::Created { card, .. }) = (&pending.provisional_id, &delta.kind) {
                delta = Delta::new(
                    DeltaKind::Rekeyed {
                        provisional_id: provisional_id.clone(),
                        card: card.clone(),
                    },
                    Channel::Local,
                )
                .with_correlation(correlation);
            }
            return Settlement::Confirmed { pending, delta };
        }
        if let Some((pending, _)) = self.rolled_back.remove(&correlation) {
            let delta = normalize_rest(outcome, &pending.intent, pending.from_list_id.as_deref())
                .with_correlation(correlation);
            return Settlement::Late { pending, delta };
        }
        Settlement::Unknown
    }

    /// Settle a failed upstream call. Returns the entry whose compensation must be applied.
    pub fn fail(&mut self, correlation: CorrelationId) -> Option<PendingMutation> {
        self.rolled_back.remove(&correlation);
        self.pending.remove(&correlation)
    }

    /// Take every pending entry whose deadline has passed.
    ///
    /// Expired entries are kept aside for one more timeout so a response that
    /// arrives late can still be recognised.
    pub fn expire(&mut self, now: DateTime<Utc>) -> Vec<PendingMutation> {
        let due: Vec<CorrelationId> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(c, _)| *c)
            .collect();
        let mut expired = Vec::with_capacity(due.len());
        for correlation in due {
            if let Some(pending) = self.pending.remove(&correlation) {
                self.rolled_back
                    .insert(correlation, (pending.clone(), now + self.timeout));
                expired.push(pending);
            }
        }
        expired.sort_by_key(|p| p.deadline);
        expired
    }

    /// Forget rolled-back entries that can no longer receive a late response.
    pub fn prune(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.rolled_back.len();
        self.rolled_back.retain(|_, (_, forget_at)| *forget_at > now);
        before - self.rolled_back.len()
    }

    /// Entries still awaiting an upstream answer, oldest first.
    pub fn pending(&self) -> impl Iterator<Item = &PendingMutation> {
        let mut entries: Vec<&PendingMutation> = self.pending.values().collect();
        entries.sort_by_key(|p| p.deadline);
        entries.into_iter()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
