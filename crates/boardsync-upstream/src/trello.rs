//! Trello HTTP client.
//!
//! Every request carries the `key` and `token` query parameters. Failures
//! are reported as `TransportError`s with the HTTP status and response body
//! when there is one.

use async_trait::async_trait;
use boardsync_core::{Board, Card, CardPatch, List, MutationApi, TransportError};
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::config::UpstreamConfig;

/// Trello REST client.
#[derive(Clone)]
pub struct TrelloClient {
    base_url: String,
    key: String,
    token: String,
    client: reqwest::Client,
}

/// Body of a card update. Only present fields are sent.
#[derive(Serialize, Default, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
struct CardUpdateBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    desc: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    id_list: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    closed: Option<bool>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateBoardBody<'a> {
    name: &'a str,
    default_lists: bool,
}

impl TrelloClient {
    pub fn new(config: &UpstreamConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();

        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            key: config.key.clone(),
            token: config.token.clone(),
            client,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, self.url(path))
            .query(&[("key", self.key.as_str()), ("token", self.token.as_str())])
    }

    async fn send<T: DeserializeOwned>(&self, operation: &str, request: RequestBuilder) -> Result<T, TransportError> {
        let response = request
            .send()
            .await
            .map_err(|e| TransportError::new(operation, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!(operation, status = status.as_u16(), "Upstream request failed");
            return Err(TransportError::with_status(operation, status.as_u16(), body));
        }

        response
            .json()
            .await
            .map_err(|e| TransportError::new(operation, format!("invalid response body: {e}")))
    }

    /// PUT a partial card body to `cards/{card_id}`.
    fn put_card(&self, card_id: &str, body: &CardUpdateBody<'_>) -> RequestBuilder {
        debug!(card_id, ?body, "Updating card");
        self.request(Method::PUT, &format!("cards/{card_id}")).json(body)
    }
}

#[async_trait]
impl MutationApi for TrelloClient {
    async fn create_card(&self, list_id: &str, name: &str, desc: Option<&str>) -> Result<Card, TransportError> {
        let mut request = self
            .request(Method::POST, "cards")
            .query(&[("idList", list_id), ("name", name)]);
        if let Some(desc) = desc {
            request = request.query(&[("desc", desc)]);
        }
        let card: Card = self.send("createCard", request).await?;
        debug!(card_id = %card.id, list_id, "Created card");
        Ok(card)
    }

    async fn update_card(&self, card_id: &str, fields: &CardPatch) -> Result<Card, TransportError> {
        let body = CardUpdateBody {
            name: fields.name.as_deref(),
            desc: fields.desc.as_deref(),
            ..CardUpdateBody::default()
        };
        self.send("updateCard", self.put_card(card_id, &body)).await
    }

    async fn move_card(&self, card_id: &str, to_list_id: &str) -> Result<Card, TransportError> {
        let body = CardUpdateBody {
            id_list: Some(to_list_id),
            ..CardUpdateBody::default()
        };
        self.send("moveCard", self.put_card(card_id, &body)).await
    }

    async fn archive_card(&self, card_id: &str) -> Result<(), TransportError> {
        let body = CardUpdateBody {
            closed: Some(true),
            ..CardUpdateBody::default()
        };
        let _: serde_json::Value = self.send("archiveCard", self.put_card(card_id, &body)).await?;
        Ok(())
    }

    async fn delete_card(&self, card_id: &str) -> Result<(), TransportError> {
        let request = self.request(Method::DELETE, &format!("cards/{card_id}"));
        let _: serde_json::Value = self.send("deleteCard", request).await?;
        Ok(())
    }

    async fn create_board(&self, name: &str, default_lists: bool) -> Result<Board, TransportError> {
        let request = self
            .request(Method::POST, "boards")
            .json(&CreateBoardBody { name, default_lists });
        self.send("createBoard", request).await
    }

    async fn fetch_boards(&self) -> Result<Vec<Board>, TransportError> {
        self.send("fetchBoards", self.request(Method::GET, "members/me/boards"))
            .await
    }

    async fn fetch_lists(&self, board_id: &str) -> Result<Vec<List>, TransportError> {
        let request = self.request(Method::GET, &format!("boards/{board_id}/lists"));
        self.send("fetchLists", request).await
    }

    async fn fetch_cards(&self, list_id: &str) -> Result<Vec<Card>, TransportError> {
        let request = self.request(Method::GET, &format!("lists/{list_id}/cards"));
        self.send("fetchCards", request).await
    }
}
