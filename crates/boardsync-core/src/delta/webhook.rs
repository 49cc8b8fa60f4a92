//! Webhook action translation.
//!
//! The upstream service posts one action record per change, for every kind
//! of object on the board. Only card lifecycle actions become deltas; the
//! rest are ignored without error.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::board::{Card, CardPatch};
use crate::error::{SyncError, SyncResult};

use super::{Channel, Delta, DeltaKind};

/// Body of a webhook delivery.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPayload {
    pub action: Option<Action>,
}

/// One upstream action record.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub action_type: String,
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub data: ActionData,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionData {
    pub card: Option<ActionCard>,
    pub list: Option<ListRef>,
    pub list_before: Option<ListRef>,
    pub list_after: Option<ListRef>,
    /// Previous values of the fields this action changed.
    pub old: Option<Map<String, Value>>,
}

/// Card as embedded in an action: only the fields relevant to the action are present.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionCard {
    pub id: Option<String>,
    pub name: Option<String>,
    pub desc: Option<String>,
    pub id_list: Option<String>,
    pub closed: Option<bool>,
    pub pos: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListRef {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Translate a raw webhook body into at most one delta.
pub fn normalize_webhook(payload: &Value) -> SyncResult<Option<Delta>> {
    let payload: WebhookPayload = serde_json::from_value(payload.clone())
        .map_err(|e| SyncError::malformed(Channel::Webhook, e.to_string()))?;
    let Some(action) = payload.action else {
        return Ok(None);
    };
    let delta = translate(&action)?;
    if delta.is_none() {
        debug!(action_type = %action.action_type, action_id = ?action.id, "Ignoring webhook action");
    }
    Ok(delta.map(|d| match action.date {
        Some(at) => d.with_source_time(at),
        None => d,
    }))
}

fn translate(action: &Action) -> SyncResult<Option<Delta>> {
    let kind = match action.action_type.as_str() {
        "createCard" | "copyCard" | "convertToCardFromCheckItem" | "moveCardToBoard" => {
            DeltaKind::Created {
                card: card_from(action)?,
                index: None,
            }
        }
        "deleteCard" | "moveCardFromBoard" => DeltaKind::Deleted {
            card_id: card_id(action)?,
        },
        "updateCard" => return translate_update(action),
        _ => return Ok(None),
    };
    Ok(Some(Delta::new(kind, Channel::Webhook)))
}

fn translate_update(action: &Action) -> SyncResult<Option<Delta>> {
    let data = &action.data;
    let card_id = card_id(action)?;
    let card = data.card.clone().unwrap_or_default();
    let old = data.old.clone().unwrap_or_default();
    let fields = changed_fields(&card, &old);

    // The before/after lists in the action are the authority for a move,
    // not whatever the store currently believes.
    if let Some(after) = &data.list_after {
        return Ok(Some(Delta::new(
            DeltaKind::Moved {
                card_id,
                from_list_id: data.list_before.as_ref().map(|l| l.id.clone()),
                to_list_id: after.id.clone(),
                index: None,
                fields,
            },
            Channel::Webhook,
        )));
    }

    if old.contains_key("closed") {
        return match card.closed {
            Some(true) => Ok(Some(Delta::archived(card_id, Channel::Webhook))),
            Some(false) => Ok(Some(Delta::new(
                DeltaKind::Created {
                    card: card_from(action)?,
                    index: None,
                },
                Channel::Webhook,
            ))),
            None => Err(SyncError::malformed(
                Channel::Webhook,
                format!("updateCard '{card_id}' changed closed without a value"),
            )),
        };
    }

    if fields.is_empty() {
        return Ok(None);
    }
    Ok(Some(Delta::updated(card_id, fields, Channel::Webhook)))
}

fn changed_fields(card: &ActionCard, old: &Map<String, Value>) -> CardPatch {
    CardPatch {
        name: old
            .contains_key("name")
            .then(|| card.name.clone())
            .flatten(),
        desc: old
            .contains_key("desc")
            .then(|| card.desc.clone().unwrap_or_default()),
    }
}

fn card_id(action: &Action) -> SyncResult<String> {
    action
        .data
        .card
        .as_ref()
        .and_then(|c| c.id.clone())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| {
            SyncError::malformed(
                Channel::Webhook,
                format!("{} action without card id", action.action_type),
            )
        })
}

fn card_from(action: &Action) -> SyncResult<Card> {
    let id = card_id(action)?;
    let data = &action.data;
    let card = data.card.clone().unwrap_or_default();
    let id_list = card
        .id_list
        .clone()
        .or_else(|| data.list.as_ref().map(|l| l.id.clone()))
        .or_else(|| data.list_after.as_ref().map(|l| l.id.clone()))
        .ok_or_else(|| {
            SyncError::malformed(
                Channel::Webhook,
                format!("{} for card '{id}' without a list", action.action_type),
            )
        })?;
    Ok(Card {
        id,
        name: card.name.unwrap_or_default(),
        desc: card.desc,
        id_list,
        pos: card.pos,
        closed: false,
    })
}
