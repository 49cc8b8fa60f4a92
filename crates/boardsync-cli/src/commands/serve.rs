//! Web server command.

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use boardsync_core::config::{
    DEFAULT_DEDUP_RETENTION_SECS, DEFAULT_PENDING_TIMEOUT_SECS, DEFAULT_TOMBSTONE_TTL_SECS,
};
use boardsync_core::{BoardRuntime, MutationApi, SyncConfig};
use boardsync_web::AppState;

use super::UpstreamArgs;

#[derive(Args)]
pub struct ServeArgs {
    /// Port to listen on
    #[arg(long, env = "PORT", default_value = "5001")]
    pub port: u16,

    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Board to host a reconciliation session for
    #[arg(long, env = "BOARDSYNC_BOARD")]
    pub board: Option<String>,

    /// Also write logs to a daily rotated file
    #[arg(long)]
    pub log: bool,

    /// Directory for log files when --log is set
    #[arg(long, default_value = ".boardsync/logs")]
    pub log_dir: PathBuf,

    /// How long applied events are remembered for duplicate detection
    #[arg(long, default_value_t = DEFAULT_DEDUP_RETENTION_SECS)]
    pub dedup_window_secs: u64,

    /// How long removed cards stay tombstoned
    #[arg(long, default_value_t = DEFAULT_TOMBSTONE_TTL_SECS)]
    pub tombstone_secs: u64,

    /// How long a local change may wait for confirmation
    #[arg(long, default_value_t = DEFAULT_PENDING_TIMEOUT_SECS)]
    pub pending_timeout_secs: u64,
}

impl ServeArgs {
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig::default()
            .with_dedup_retention(Duration::from_secs(self.dedup_window_secs))
            .with_tombstone_ttl(Duration::from_secs(self.tombstone_secs))
            .with_pending_timeout(Duration::from_secs(self.pending_timeout_secs))
    }
}

pub async fn execute(args: ServeArgs, upstream: &UpstreamArgs) -> Result<()> {
    let api: Arc<dyn MutationApi> = Arc::new(upstream.client()?);
    let mut state = AppState::new(api.clone());

    if let Some(board_id) = &args.board {
        let handle = BoardRuntime::spawn(api, board_id.clone(), args.sync_config());
        state = state.with_sync(handle);
    }

    println!();
    println!(
        "  {} {}",
        "Boardsync".cyan().bold(),
        "Web Server".bold()
    );
    println!();
    println!(
        "  {}       http://{}:{}/api",
        "API".green(),
        args.host,
        args.port
    );
    println!(
        "  {}  ws://{}:{}/ws",
        "WebSocket".green(),
        args.host,
        args.port
    );
    println!(
        "  {}    http://{}:{}/webhook/trello",
        "Webhook".green(),
        args.host,
        args.port
    );
    match &args.board {
        Some(board_id) => println!("  {}      {}", "Board".green(), board_id),
        None => println!("  {}      {}", "Board".green(), "none (proxy only)".dimmed()),
    }
    if args.log {
        println!("  {}       {}", "Logs".green(), args.log_dir.display());
    }
    println!();
    println!("  {}", "Ctrl+C to stop".dimmed());
    println!();

    boardsync_web::run_server(state, &args.host, args.port).await?;

    Ok(())
}
