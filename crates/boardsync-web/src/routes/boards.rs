//! Board, list and card listing handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use boardsync_core::{Board, Card, List};
use serde::Deserialize;

use super::{bad_request, upstream_error, ApiError};
use crate::state::{AppState, ServerMessage};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBoardRequest {
    pub name: Option<String>,
    #[serde(default)]
    pub default_lists: bool,
}

pub async fn list_boards(State(state): State<AppState>) -> Result<Json<Vec<Board>>, ApiError> {
    let boards = state.api.fetch_boards().await.map_err(upstream_error)?;
    Ok(Json(boards))
}

pub async fn create_board(
    State(state): State<AppState>,
    Json(req): Json<CreateBoardRequest>,
) -> Result<(StatusCode, Json<Board>), ApiError> {
    let Some(name) = req.name.filter(|n| !n.trim().is_empty()) else {
        return Err(bad_request("Board name is required"));
    };

    let board = state
        .api
        .create_board(&name, req.default_lists)
        .await
        .map_err(upstream_error)?;

    state.broadcast(ServerMessage::BoardCreated(board.clone()));
    Ok((StatusCode::CREATED, Json(board)))
}

pub async fn board_lists(
    State(state): State<AppState>,
    Path(board_id): Path<String>,
) -> Result<Json<Vec<List>>, ApiError> {
    let lists = state.api.fetch_lists(&board_id).await.map_err(upstream_error)?;
    Ok(Json(lists))
}

pub async fn list_cards(
    State(state): State<AppState>,
    Path(list_id): Path<String>,
) -> Result<Json<Vec<Card>>, ApiError> {
    let cards = state.api.fetch_cards(&list_id).await.map_err(upstream_error)?;
    Ok(Json(cards))
}
