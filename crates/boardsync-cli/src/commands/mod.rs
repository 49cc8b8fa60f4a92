//! CLI command definitions and handlers.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::time::Duration;

use boardsync_upstream::config::{API_URL_VAR, DEFAULT_API_URL, DEFAULT_TIMEOUT_SECS, KEY_VAR, TOKEN_VAR};
use boardsync_upstream::{TrelloClient, UpstreamConfig};

pub mod board;
pub mod serve;

/// Boardsync - real-time Trello board server
#[derive(Parser)]
#[command(name = "boardsync")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(flatten)]
    pub upstream: UpstreamArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Credentials and endpoint of the upstream API.
#[derive(Args)]
pub struct UpstreamArgs {
    /// Trello API key
    #[arg(long, env = KEY_VAR, global = true, hide_env_values = true)]
    pub trello_key: Option<String>,

    /// Trello API token
    #[arg(long, env = TOKEN_VAR, global = true, hide_env_values = true)]
    pub trello_token: Option<String>,

    /// Trello API root
    #[arg(long, env = API_URL_VAR, global = true, default_value = DEFAULT_API_URL)]
    pub api_url: String,

    /// Per-request timeout in seconds
    #[arg(long, global = true, default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub timeout_secs: u64,
}

impl UpstreamArgs {
    pub fn config(&self) -> Result<UpstreamConfig> {
        let key = self
            .trello_key
            .clone()
            .filter(|k| !k.is_empty())
            .with_context(|| format!("Missing Trello key: pass --trello-key or set {KEY_VAR}"))?;
        let token = self
            .trello_token
            .clone()
            .filter(|t| !t.is_empty())
            .with_context(|| format!("Missing Trello token: pass --trello-token or set {TOKEN_VAR}"))?;
        Ok(UpstreamConfig::new(key, token)
            .with_base_url(self.api_url.as_str())
            .with_timeout(Duration::from_secs(self.timeout_secs)))
    }

    pub fn client(&self) -> Result<TrelloClient> {
        Ok(TrelloClient::new(&self.config()?))
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the web server
    Serve(serve::ServeArgs),

    /// Inspect and create boards directly on Trello
    #[command(subcommand)]
    Board(board::BoardCommands),
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Serve(args) => serve::execute(args, &self.upstream).await,
            Commands::Board(cmd) => board::execute(cmd, &self.upstream).await,
        }
    }
}
