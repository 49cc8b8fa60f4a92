//! # Boardsync Upstream
//!
//! HTTP client for the Trello REST API.
//!
//! Implements the core crate's `MutationApi` port so the reconciliation
//! engine, the web proxy and the CLI all talk to the same client.

pub mod config;
pub mod trello;

pub use config::{ConfigError, UpstreamConfig};
pub use trello::TrelloClient;
