//! Terminal output formatting.

use boardsync_core::{Board, Card, List};
use colored::Colorize;

/// Print boards as a table.
pub fn print_boards_table(boards: &[Board]) {
    if boards.is_empty() {
        println!("{}", "No boards found.".dimmed());
        return;
    }

    println!("{:<26} {:<40}", "ID", "Name");
    println!("{}", "─".repeat(66));

    for board in boards {
        println!("{:<26} {:<40}", board.id.dimmed(), truncate(&board.name, 38));
    }
}

/// Print the lists of a board in upstream order.
pub fn print_lists_table(lists: &[List]) {
    if lists.is_empty() {
        println!("{}", "No lists found.".dimmed());
        return;
    }

    let mut ordered: Vec<&List> = lists.iter().collect();
    ordered.sort_by(|a, b| a.pos.total_cmp(&b.pos));

    println!("{:<26} {:<30} {:<8}", "ID", "Name", "State");
    println!("{}", "─".repeat(66));

    for list in ordered {
        let state = if list.closed {
            "closed".dimmed()
        } else {
            "open".green()
        };
        println!(
            "{:<26} {:<30} {:<8}",
            list.id.dimmed(),
            truncate(&list.name, 28),
            state
        );
    }
}

/// Print the cards of a list.
pub fn print_cards_table(cards: &[Card]) {
    if cards.is_empty() {
        println!("{}", "No cards found.".dimmed());
        return;
    }

    println!("{:<26} {:<30} {:<30}", "ID", "Name", "Description");
    println!("{}", "─".repeat(88));

    for card in cards {
        let name = if card.closed {
            truncate(&card.name, 28).dimmed()
        } else {
            truncate(&card.name, 28).normal()
        };
        let desc = card.desc.as_deref().unwrap_or("");
        println!(
            "{:<26} {:<30} {:<30}",
            card.id.dimmed(),
            name,
            truncate(desc, 28).dimmed()
        );
    }
}

/// Truncate a string to a maximum number of characters.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
