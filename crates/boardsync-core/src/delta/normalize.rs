//! Normalizers for REST responses and broadcast events.

use crate::api::MutationOutcome;
use crate::board::{BoardStore, CardPatch};
use crate::broadcast::BroadcastEvent;
use crate::error::SyncResult;
use crate::optimistic::Intent;

use super::{Channel, Delta, DeltaKind};

pub use super::webhook::normalize_webhook;

/// An inbound event from a source other than the local user.
#[derive(Debug, Clone, PartialEq)]
pub enum RawEvent {
    Broadcast(BroadcastEvent),
    Webhook(serde_json::Value),
}

impl RawEvent {
    pub fn channel(&self) -> Channel {
        match self {
            Self::Broadcast(_) => Channel::Broadcast,
            Self::Webhook(_) => Channel::Webhook,
        }
    }
}

/// Translate a broadcast event into at most one delta.
///
/// `store` supplies the card's last known owning list so that a
/// `cardUpdated` carrying a different `idList` becomes a move.
pub fn normalize_broadcast(event: &BroadcastEvent, store: &BoardStore) -> SyncResult<Option<Delta>> {
    event.validate()?;
    let delta = match event {
        BroadcastEvent::CardCreated(card) => Delta::created(card.clone(), None, Channel::Broadcast),
        BroadcastEvent::CardUpdated { card_id, updates } => {
            let fields = updates.patch();
            let known_list = store.locate(card_id).map(|(list_id, _)| list_id);
            match updates.id_list.as_deref() {
                Some(to) if known_list != Some(to) => Delta::new(
                    DeltaKind::Moved {
                        card_id: card_id.clone(),
                        from_list_id: known_list.map(str::to_string),
                        to_list_id: to.to_string(),
                        index: None,
                        fields,
                    },
                    Channel::Broadcast,
                ),
                _ if fields.is_empty() => return Ok(None),
                _ => Delta::updated(card_id.clone(), fields, Channel::Broadcast),
            }
        }
        BroadcastEvent::CardDeleted { card_id } => Delta::deleted(card_id.clone(), Channel::Broadcast),
        BroadcastEvent::CardArchived { card_id } => Delta::archived(card_id.clone(), Channel::Broadcast),
    };
    Ok(Some(delta))
}

/// Translate the REST response to a local mutation into a delta.
///
/// `intent` is the mutation that was issued and `from_list_id` the card's
/// owning list before the optimistic change, which the response no longer
/// carries.
pub fn normalize_rest(outcome: &MutationOutcome, intent: &Intent, from_list_id: Option<&str>) -> Delta {
    match outcome {
        MutationOutcome::Created(card) => Delta::created(card.clone(), None, Channel::Local),
        MutationOutcome::Updated(card) => {
            let fields = match intent {
                Intent::UpdateCard { fields, .. } => fields.read_from(card),
                _ => CardPatch {
                    name: Some(card.name.clone()),
                    desc: card.desc.clone(),
                },
            };
            Delta::updated(card.id.clone(), fields, Channel::Local)
        }
        MutationOutcome::Moved(card) => {
            let index = match intent {
                Intent::MoveCard { index, .. } => *index,
                _ => None,
            };
            Delta::moved(
                card.id.clone(),
                from_list_id.map(str::to_string),
                card.id_list.clone(),
                index,
                Channel::Local,
            )
        }
        MutationOutcome::Archived { card_id } => Delta::archived(card_id.clone(), Channel::Local),
        MutationOutcome::Deleted { card_id } => Delta::deleted(card_id.clone(), Channel::Local),
    }
}
