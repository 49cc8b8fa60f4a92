//! Card route handlers.
//!
//! Each successful mutation is mirrored to every viewer as a card event.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use boardsync_core::{BroadcastEvent, Card, CardPatch, CardUpdates};
use serde::{Deserialize, Serialize};

use super::{bad_request, upstream_error, ApiError};
use crate::state::AppState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    pub id_list: Option<String>,
    pub name: Option<String>,
    pub desc: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTaskRequest {
    pub name: Option<String>,
    pub desc: Option<String>,
    pub id_list: Option<String>,
}

#[derive(Serialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RemovalResponse {
    pub success: bool,
    pub message: String,
    pub card_id: String,
}

pub async fn create_task(
    State(state): State<AppState>,
    Json(req): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<Card>), ApiError> {
    let (Some(id_list), Some(name)) = (
        req.id_list.filter(|s| !s.is_empty()),
        req.name.filter(|s| !s.is_empty()),
    ) else {
        return Err(bad_request("idList and name are required"));
    };

    let card = state
        .api
        .create_card(&id_list, &name, req.desc.as_deref().filter(|d| !d.is_empty()))
        .await
        .map_err(upstream_error)?;

    state.publish(BroadcastEvent::CardCreated(card.clone())).await;
    Ok((StatusCode::CREATED, Json(card)))
}

pub async fn update_task(
    State(state): State<AppState>,
    Path(card_id): Path<String>,
    Json(req): Json<UpdateTaskRequest>,
) -> Result<Json<Card>, ApiError> {
    let fields = CardPatch {
        name: req.name.clone(),
        desc: req.desc.clone(),
    };
    if fields.is_empty() && req.id_list.is_none() {
        return Err(bad_request("nothing to update"));
    }

    let mut card = None;
    if !fields.is_empty() {
        card = Some(
            state
                .api
                .update_card(&card_id, &fields)
                .await
                .map_err(upstream_error)?,
        );
    }
    if let Some(id_list) = &req.id_list {
        card = Some(
            state
                .api
                .move_card(&card_id, id_list)
                .await
                .map_err(upstream_error)?,
        );
    }
    let Some(card) = card else {
        return Err(bad_request("nothing to update"));
    };

    state
        .publish(BroadcastEvent::CardUpdated {
            card_id,
            updates: CardUpdates {
                name: req.name,
                desc: req.desc,
                id_list: req.id_list,
            },
        })
        .await;
    Ok(Json(card))
}

pub async fn close_task(
    State(state): State<AppState>,
    Path(card_id): Path<String>,
) -> Result<Json<RemovalResponse>, ApiError> {
    state.api.archive_card(&card_id).await.map_err(upstream_error)?;
    state
        .publish(BroadcastEvent::CardArchived {
            card_id: card_id.clone(),
        })
        .await;
    Ok(Json(RemovalResponse {
        success: true,
        message: "Card successfully closed (soft deleted)".to_string(),
        card_id,
    }))
}

pub async fn delete_task(
    State(state): State<AppState>,
    Path(card_id): Path<String>,
) -> Result<Json<RemovalResponse>, ApiError> {
    state.api.delete_card(&card_id).await.map_err(upstream_error)?;
    state
        .publish(BroadcastEvent::CardDeleted {
            card_id: card_id.clone(),
        })
        .await;
    Ok(Json(RemovalResponse {
        success: true,
        message: "Card permanently deleted".to_string(),
        card_id,
    }))
}
