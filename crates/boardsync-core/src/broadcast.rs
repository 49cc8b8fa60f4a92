//! Broadcast channel payloads.
//!
//! The server emits one of these to every connected viewer after a
//! successful mutation; viewers feed them back into their own engine.

use serde::{Deserialize, Serialize};

use crate::api::MutationOutcome;
use crate::board::{Card, CardPatch};
use crate::delta::Channel;
use crate::error::{SyncError, SyncResult};

/// Fields carried by a `cardUpdated` broadcast. Only present keys changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardUpdates {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_list: Option<String>,
}

impl CardUpdates {
    /// The text part of the update.
    pub fn patch(&self) -> CardPatch {
        CardPatch {
            name: self.name.clone(),
            desc: self.desc.clone(),
        }
    }
}

/// Card change mirrored over the broadcast channel.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum BroadcastEvent {
    /// A card was created.
    CardCreated(Card),
    /// A card's fields (possibly its owning list) changed.
    CardUpdated { card_id: String, updates: CardUpdates },
    /// A card was permanently deleted.
    CardDeleted { card_id: String },
    /// A card was closed (soft deleted).
    CardArchived { card_id: String },
}

impl BroadcastEvent {
    /// Parse a raw broadcast payload, reporting missing fields as malformed.
    pub fn from_json(value: serde_json::Value) -> SyncResult<Self> {
        let event: Self = serde_json::from_value(value)
            .map_err(|e| SyncError::malformed(Channel::Broadcast, e.to_string()))?;
        event.validate()?;
        Ok(event)
    }

    /// Reject payloads that deserialize but cannot describe a change.
    pub fn validate(&self) -> SyncResult<()> {
        match self {
            Self::CardCreated(card) => {
                if card.id.is_empty() {
                    return Err(SyncError::malformed(Channel::Broadcast, "cardCreated without id"));
                }
                if card.id_list.is_empty() {
                    return Err(SyncError::malformed(
                        Channel::Broadcast,
                        format!("cardCreated '{}' without idList", card.id),
                    ));
                }
                Ok(())
            }
            Self::CardUpdated { card_id, .. }
            | Self::CardDeleted { card_id }
            | Self::CardArchived { card_id } => {
                if card_id.is_empty() {
                    Err(SyncError::malformed(Channel::Broadcast, "event without cardId"))
                } else {
                    Ok(())
                }
            }
        }
    }

    /// The event other viewers should receive after a local mutation succeeded upstream.
    pub fn from_outcome(outcome: &MutationOutcome) -> Self {
        match outcome {
            MutationOutcome::Created(card) => Self::CardCreated(card.clone()),
            MutationOutcome::Updated(card) => Self::CardUpdated {
                card_id: card.id.clone(),
                updates: CardUpdates {
                    name: Some(card.name.clone()),
                    desc: Some(card.desc.clone().unwrap_or_default()),
                    id_list: None,
                },
            },
            MutationOutcome::Moved(card) => Self::CardUpdated {
                card_id: card.id.clone(),
                updates: CardUpdates {
                    id_list: Some(card.id_list.clone()),
                    ..CardUpdates::default()
                },
            },
            MutationOutcome::Archived { card_id } => Self::CardArchived {
                card_id: card_id.clone(),
            },
            MutationOutcome::Deleted { card_id } => Self::CardDeleted {
                card_id: card_id.clone(),
            },
        }
    }

    pub fn card_id(&self) -> &str {
        match self {
            Self::CardCreated(card) => &card.id,
            Self::CardUpdated { card_id, .. }
            | Self::CardDeleted { card_id }
            | Self::CardArchived { card_id } => card_id,
        }
    }
}
