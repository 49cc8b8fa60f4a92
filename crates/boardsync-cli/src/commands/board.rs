//! Direct board commands against the upstream API.

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;

use boardsync_core::MutationApi;

use super::UpstreamArgs;
use crate::output;

#[derive(Subcommand)]
pub enum BoardCommands {
    /// Create a new board
    Create {
        /// Board name
        name: String,

        /// Let Trello add its default lists
        #[arg(long)]
        default_lists: bool,
    },

    /// List boards visible to the token
    Boards,

    /// Show the lists of a board
    Lists {
        /// Board ID
        board_id: String,
    },

    /// Show the cards of a list
    Cards {
        /// List ID
        list_id: String,
    },
}

pub async fn execute(cmd: BoardCommands, upstream: &UpstreamArgs) -> Result<()> {
    let client = upstream.client()?;

    match cmd {
        BoardCommands::Create {
            name,
            default_lists,
        } => {
            let board = client
                .create_board(&name, default_lists)
                .await
                .with_context(|| format!("Failed to create board '{}'", name))?;
            println!(
                "{} Created board: {} ({})",
                "✓".green().bold(),
                board.name.cyan(),
                board.id.dimmed()
            );
            if let Some(url) = &board.url {
                println!("  {}", url.dimmed());
            }
        }

        BoardCommands::Boards => {
            let boards = client.fetch_boards().await.context("Failed to fetch boards")?;
            output::print_boards_table(&boards);
        }

        BoardCommands::Lists { board_id } => {
            let lists = client
                .fetch_lists(&board_id)
                .await
                .with_context(|| format!("Failed to fetch lists of board {}", board_id))?;
            output::print_lists_table(&lists);
        }

        BoardCommands::Cards { list_id } => {
            let cards = client
                .fetch_cards(&list_id)
                .await
                .with_context(|| format!("Failed to fetch cards of list {}", list_id))?;
            output::print_cards_table(&cards);
        }
    }

    Ok(())
}
