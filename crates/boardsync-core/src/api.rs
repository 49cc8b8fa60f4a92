//! The upstream task API as seen by the engine.

use async_trait::async_trait;

use crate::board::{Board, Card, CardPatch, List};
use crate::error::TransportError;
use crate::optimistic::Intent;

/// Outbound calls against the upstream task-management service.
///
/// Implementations perform network I/O; the engine only ever calls them from
/// spawned tasks whose results re-enter the board runtime's queue.
#[async_trait]
pub trait MutationApi: Send + Sync {
    async fn create_card(&self, list_id: &str, name: &str, desc: Option<&str>) -> Result<Card, TransportError>;

    async fn update_card(&self, card_id: &str, fields: &CardPatch) -> Result<Card, TransportError>;

    async fn move_card(&self, card_id: &str, to_list_id: &str) -> Result<Card, TransportError>;

    async fn archive_card(&self, card_id: &str) -> Result<(), TransportError>;

    async fn delete_card(&self, card_id: &str) -> Result<(), TransportError>;

    async fn create_board(&self, name: &str, default_lists: bool) -> Result<Board, TransportError>;

    async fn fetch_boards(&self) -> Result<Vec<Board>, TransportError>;

    async fn fetch_lists(&self, board_id: &str) -> Result<Vec<List>, TransportError>;

    async fn fetch_cards(&self, list_id: &str) -> Result<Vec<Card>, TransportError>;
}

/// Successful result of a card mutation call.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome {
    Created(Card),
    Updated(Card),
    Moved(Card),
    Archived { card_id: String },
    Deleted { card_id: String },
}

/// Lists of a board together with each list's cards, as returned by a full fetch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoardSnapshot {
    pub lists: Vec<List>,
    pub cards: Vec<Card>,
}

/// Fetch every list of `board_id` and every card of those lists.
pub async fn fetch_board(api: &dyn MutationApi, board_id: &str) -> Result<BoardSnapshot, TransportError> {
    let lists = api.fetch_lists(board_id).await?;
    let mut cards = Vec::new();
    for list in &lists {
        cards.extend(api.fetch_cards(&list.id).await?);
    }
    Ok(BoardSnapshot { lists, cards })
}

/// Issue the upstream call for a local intent.
pub async fn execute(api: &dyn MutationApi, intent: &Intent) -> Result<MutationOutcome, TransportError> {
    let outcome = match intent {
        Intent::CreateCard { list_id, name, desc } => {
            MutationOutcome::Created(api.create_card(list_id, name, desc.as_deref()).await?)
        }
        Intent::MoveCard {
            card_id, to_list_id, ..
        } => MutationOutcome::Moved(api.move_card(card_id, to_list_id).await?),
        Intent::UpdateCard { card_id, fields } => MutationOutcome::Updated(api.update_card(card_id, fields).await?),
        Intent::ArchiveCard { card_id } => {
            api.archive_card(card_id).await?;
            MutationOutcome::Archived {
                card_id: card_id.clone(),
            }
        }
        Intent::DeleteCard { card_id } => {
            api.delete_card(card_id).await?;
            MutationOutcome::Deleted {
                card_id: card_id.clone(),
            }
        }
    };
    Ok(outcome)
}
