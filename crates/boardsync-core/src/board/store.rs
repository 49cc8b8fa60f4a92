//! Board state store: the authoritative list → ordered cards mapping.
//!
//! The store is owned by a single engine and mutated only through
//! [`Mutation`]s produced by the reconciler. Every mutation is total: it
//! either applies completely or is rejected without touching anything.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use super::model::{Card, CardPatch, List, ListSnapshot};
use crate::error::{SyncError, SyncResult};

/// Notification sent to subscribers after a successful mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreChange {
    /// Every list whose sequence changed, with its new content.
    pub lists: Vec<ListSnapshot>,
}

impl StoreChange {
    pub fn list_ids(&self) -> Vec<&str> {
        self.lists.iter().map(|l| l.list_id.as_str()).collect()
    }

    pub fn list(&self, list_id: &str) -> Option<&ListSnapshot> {
        self.lists.iter().find(|l| l.list_id == list_id)
    }
}

/// A validated change to the store.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Mutation {
    Insert { card: Card, index: Option<usize> },
    Patch { card_id: String, patch: CardPatch },
    Relocate {
        card_id: String,
        to_list_id: String,
        index: Option<usize>,
        patch: CardPatch,
    },
    Remove { card_id: String },
    Replace { old_id: String, card: Card },
}

/// In-memory board state.
pub struct BoardStore {
    lists: Vec<List>,
    cards: HashMap<String, Vec<Card>>,
    owner: HashMap<String, String>,
    changes: broadcast::Sender<StoreChange>,
}

impl BoardStore {
    /// Create an empty store whose notification channel holds `capacity` changes.
    pub fn new(capacity: usize) -> Self {
        let (changes, _rx) = broadcast::channel(capacity.max(1));
        Self {
            lists: Vec::new(),
            cards: HashMap::new(),
            owner: HashMap::new(),
            changes,
        }
    }

    /// Receive a [`StoreChange`] after every applied mutation.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }

    pub(crate) fn sender(&self) -> broadcast::Sender<StoreChange> {
        self.changes.clone()
    }

    /// Lists in board order.
    pub fn lists(&self) -> &[List] {
        &self.lists
    }

    pub fn has_list(&self, list_id: &str) -> bool {
        self.cards.contains_key(list_id)
    }

    /// Cards of a list in order. Unknown lists are empty.
    pub fn cards(&self, list_id: &str) -> &[Card] {
        self.cards.get(list_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, card_id: &str) -> bool {
        self.owner.contains_key(card_id)
    }

    pub fn card(&self, card_id: &str) -> Option<&Card> {
        let (list_id, index) = self.locate(card_id)?;
        self.cards.get(list_id)?.get(index)
    }

    /// Owning list and index of a card.
    pub fn locate(&self, card_id: &str) -> Option<(&str, usize)> {
        let list_id = self.owner.get(card_id)?;
        let index = self.cards.get(list_id)?.iter().position(|c| c.id == card_id)?;
        Some((list_id.as_str(), index))
    }

    pub fn card_count(&self) -> usize {
        self.owner.len()
    }

    pub fn list_snapshot(&self, list_id: &str) -> Option<ListSnapshot> {
        let cards = self.cards.get(list_id)?;
        let name = self
            .lists
            .iter()
            .find(|l| l.id == list_id)
            .map(|l| l.name.clone())
            .unwrap_or_default();
        Some(ListSnapshot {
            list_id: list_id.to_string(),
            name,
            cards: cards.clone(),
        })
    }

    /// Every list with its cards, in board order.
    pub fn snapshot(&self) -> Vec<ListSnapshot> {
        self.lists
            .iter()
            .filter_map(|l| self.list_snapshot(&l.id))
            .collect()
    }

    /// Replace the whole board with the result of a full fetch.
    ///
    /// Closed lists and cards are left out, as are cards for which `skip`
    /// returns true and cards whose list is not among `lists`.
    pub fn load(&mut self, lists: Vec<List>, cards: Vec<Card>, skip: impl Fn(&str) -> bool) -> StoreChange {
        let mut lists: Vec<List> = lists.into_iter().filter(|l| !l.closed).collect();
        lists.sort_by(|a, b| a.pos.partial_cmp(&b.pos).unwrap_or(Ordering::Equal));

        let mut by_list: HashMap<String, Vec<Card>> =
            lists.iter().map(|l| (l.id.clone(), Vec::new())).collect();
        let mut owner = HashMap::new();
        let mut skipped = 0usize;

        for card in cards {
            if card.closed || skip(card.id.as_str()) || owner.contains_key(&card.id) {
                skipped += 1;
                continue;
            }
            let Some(seq) = by_list.get_mut(&card.id_list) else {
                skipped += 1;
                continue;
            };
            owner.insert(card.id.clone(), card.id_list.clone());
            seq.push(card);
        }
        for seq in by_list.values_mut() {
            seq.sort_by(|a, b| match (a.pos, b.pos) {
                (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            });
        }

        self.lists = lists;
        self.cards = by_list;
        self.owner = owner;
        debug!(
            lists = self.lists.len(),
            cards = self.owner.len(),
            skipped,
            "Board store loaded"
        );

        let change = StoreChange {
            lists: self.snapshot(),
        };
        let _ = self.changes.send(change.clone());
        change
    }

    /// Apply a mutation. `Ok(None)` means it was valid but changed nothing.
    pub(crate) fn apply(&mut self, mutation: Mutation) -> SyncResult<Option<StoreChange>> {
        let touched = match mutation {
            Mutation::Insert { card, index } => self.insert(card, index)?,
            Mutation::Patch { card_id, patch } => self.patch(&card_id, &patch)?,
            Mutation::Relocate {
                card_id,
                to_list_id,
                index,
                patch,
            } => self.relocate(&card_id, &to_list_id, index, &patch)?,
            Mutation::Remove { card_id } => self.remove(&card_id).map(|(list_id, _)| vec![list_id]),
            Mutation::Replace { old_id, card } => self.replace(&old_id, card)?,
        };

        let Some(list_ids) = touched else {
            return Ok(None);
        };
        let change = StoreChange {
            lists: list_ids
                .iter()
                .filter_map(|id| self.list_snapshot(id))
                .collect(),
        };
        let _ = self.changes.send(change.clone());
        Ok(Some(change))
    }

    fn insert(&mut self, mut card: Card, index: Option<usize>) -> SyncResult<Option<Vec<String>>> {
        if self.owner.contains_key(&card.id) {
            return Ok(None);
        }
        let list_id = card.id_list.clone();
        let seq = self
            .cards
            .get_mut(&list_id)
            .ok_or_else(|| SyncError::stale_list(&list_id))?;
        let at = clamp(index, seq.len());
        card.closed = false;
        self.owner.insert(card.id.clone(), list_id.clone());
        seq.insert(at, card);
        Ok(Some(vec![list_id]))
    }

    fn patch(&mut self, card_id: &str, patch: &CardPatch) -> SyncResult<Option<Vec<String>>> {
        let (list_id, index) = self
            .locate(card_id)
            .map(|(l, i)| (l.to_string(), i))
            .ok_or_else(|| SyncError::stale_card(card_id))?;
        let changed = self
            .cards
            .get_mut(&list_id)
            .and_then(|seq| seq.get_mut(index))
            .map(|card| card.merge(patch))
            .unwrap_or(false);
        Ok(changed.then(|| vec![list_id]))
    }

    fn relocate(
        &mut self,
        card_id: &str,
        to_list_id: &str,
        index: Option<usize>,
        patch: &CardPatch,
    ) -> SyncResult<Option<Vec<String>>> {
        if !self.has_list(to_list_id) {
            return Err(SyncError::stale_list(to_list_id));
        }
        let (from_list_id, from_index) = self
            .locate(card_id)
            .map(|(l, i)| (l.to_string(), i))
            .ok_or_else(|| SyncError::stale_card(card_id))?;

        let target_len = self.cards(to_list_id).len() - usize::from(from_list_id == to_list_id);
        let at = clamp(index, target_len);
        let text_changed = self
            .card(card_id)
            .map(|c| c.clone().merge(patch))
            .unwrap_or(false);
        if from_list_id == to_list_id && from_index == at && !text_changed {
            return Ok(None);
        }

        let Some((_, mut card)) = self.remove(card_id) else {
            return Err(SyncError::stale_card(card_id));
        };
        card.merge(patch);
        card.id_list = to_list_id.to_string();
        self.owner.insert(card.id.clone(), to_list_id.to_string());
        if let Some(seq) = self.cards.get_mut(to_list_id) {
            seq.insert(at, card);
        }

        let mut touched = vec![from_list_id];
        if touched[0] != to_list_id {
            touched.push(to_list_id.to_string());
        }
        Ok(Some(touched))
    }

    fn remove(&mut self, card_id: &str) -> Option<(String, Card)> {
        let (list_id, index) = self.locate(card_id).map(|(l, i)| (l.to_string(), i))?;
        let card = self.cards.get_mut(&list_id)?.remove(index);
        self.owner.remove(card_id);
        Some((list_id, card))
    }

    fn replace(&mut self, old_id: &str, mut card: Card) -> SyncResult<Option<Vec<String>>> {
        let (list_id, index) = self
            .locate(old_id)
            .map(|(l, i)| (l.to_string(), i))
            .ok_or_else(|| SyncError::stale_card(old_id))?;

        if self.owner.contains_key(&card.id) {
            // The confirmed card is already on the board; drop the placeholder.
            self.remove(old_id);
            return Ok(Some(vec![list_id]));
        }

        card.closed = false;
        if card.id_list != list_id && self.has_list(&card.id_list) {
            self.remove(old_id);
            return self
                .insert(card, None)
                .map(|touched| touched.map(|mut t| {
                    t.insert(0, list_id);
                    t
                }));
        }

        card.id_list = list_id.clone();
        self.owner.remove(old_id);
        self.owner.insert(card.id.clone(), list_id.clone());
        if let Some(slot) = self.cards.get_mut(&list_id).and_then(|seq| seq.get_mut(index)) {
            *slot = card;
        }
        Ok(Some(vec![list_id]))
    }

    /// Check the structural invariants: every card id appears in exactly one
    /// list sequence and the owner index agrees with the sequences.
    pub fn is_consistent(&self) -> bool {
        let mut seen = HashSet::new();
        for (list_id, seq) in &self.cards {
            for card in seq {
                if !seen.insert(card.id.as_str()) {
                    return false;
                }
                if self.owner.get(&card.id) != Some(list_id) || &card.id_list != list_id {
                    return false;
                }
            }
        }
        seen.len() == self.owner.len()
    }
}

impl Default for BoardStore {
    fn default() -> Self {
        Self::new(100)
    }
}

fn clamp(index: Option<usize>, len: usize) -> usize {
    index.map_or(len, |i| i.min(len))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(id: &str, pos: f64) -> List {
        List {
            id: id.to_string(),
            name: format!("List {id}"),
            id_board: Some("B1".to_string()),
            pos,
            closed: false,
        }
    }

    fn store() -> BoardStore {
        let mut store = BoardStore::new(16);
        store.load(
            vec![list("L2", 2.0), list("L1", 1.0), list("L3", 3.0)],
            vec![
                Card::new("a", "L1", "A"),
                Card::new("b", "L1", "B"),
                Card::new("c", "L2", "C"),
            ],
            |_| false,
        );
        store
    }

    fn ids(store: &BoardStore, list_id: &str) -> Vec<String> {
        store.cards(list_id).iter().map(|c| c.id.clone()).collect()
    }

    #[test]
    fn load_orders_lists_by_position() {
        let store = store();
        let order: Vec<&str> = store.lists().iter().map(|l| l.id.as_str()).collect();
        assert_eq!(order, vec!["L1", "L2", "L3"]);
        assert_eq!(store.card_count(), 3);
        assert!(store.is_consistent());
    }

    #[test]
    fn load_orders_cards_by_position_and_skips() {
        let mut store = BoardStore::new(4);
        let mut first = Card::new("x", "L1", "X");
        first.pos = Some(200.0);
        let mut second = Card::new("y", "L1", "Y");
        second.pos = Some(100.0);
        let mut closed = Card::new("z", "L1", "Z");
        closed.closed = true;
        store.load(
            vec![list("L1", 1.0)],
            vec![first, second, closed, Card::new("gone", "L1", "G"), Card::new("w", "L9", "W")],
            |id| id == "gone",
        );
        assert_eq!(ids(&store, "L1"), vec!["y", "x"]);
    }

    #[test]
    fn insert_is_idempotent_and_clamped() {
        let mut store = store();
        let change = store
            .apply(Mutation::Insert {
                card: Card::new("d", "L1", "D"),
                index: Some(99),
            })
            .unwrap()
            .unwrap();
        assert_eq!(change.list_ids(), vec!["L1"]);
        assert_eq!(ids(&store, "L1"), vec!["a", "b", "d"]);

        let again = store
            .apply(Mutation::Insert {
                card: Card::new("d", "L2", "D"),
                index: Some(0),
            })
            .unwrap();
        assert!(again.is_none());
        assert_eq!(ids(&store, "L2"), vec!["c"]);
    }

    #[test]
    fn insert_into_unknown_list_is_rejected() {
        let mut store = store();
        let err = store
            .apply(Mutation::Insert {
                card: Card::new("d", "L9", "D"),
                index: None,
            })
            .unwrap_err();
        assert!(err.is_stale());
        assert!(!store.contains("d"));
    }

    #[test]
    fn relocate_moves_between_lists() {
        let mut store = store();
        let change = store
            .apply(Mutation::Relocate {
                card_id: "a".to_string(),
                to_list_id: "L2".to_string(),
                index: Some(0),
                patch: CardPatch::default(),
            })
            .unwrap()
            .unwrap();
        assert_eq!(change.list_ids(), vec!["L1", "L2"]);
        assert_eq!(ids(&store, "L1"), vec!["b"]);
        assert_eq!(ids(&store, "L2"), vec!["a", "c"]);
        assert_eq!(store.card("a").unwrap().id_list, "L2");
        assert!(store.is_consistent());
    }

    #[test]
    fn relocate_within_list_reorders() {
        let mut store = store();
        store
            .apply(Mutation::Relocate {
                card_id: "a".to_string(),
                to_list_id: "L1".to_string(),
                index: Some(5),
                patch: CardPatch::default(),
            })
            .unwrap();
        assert_eq!(ids(&store, "L1"), vec!["b", "a"]);

        let unchanged = store
            .apply(Mutation::Relocate {
                card_id: "a".to_string(),
                to_list_id: "L1".to_string(),
                index: None,
                patch: CardPatch::default(),
            })
            .unwrap();
        assert!(unchanged.is_none());
    }

    #[test]
    fn relocate_to_unknown_list_leaves_card_in_place() {
        let mut store = store();
        let err = store
            .apply(Mutation::Relocate {
                card_id: "a".to_string(),
                to_list_id: "nope".to_string(),
                index: None,
                patch: CardPatch::default(),
            })
            .unwrap_err();
        assert!(err.is_stale());
        assert_eq!(store.locate("a"), Some(("L1", 0)));
    }

    #[test]
    fn replace_swaps_placeholder_in_place() {
        let mut store = store();
        store
            .apply(Mutation::Insert {
                card: Card::new("local-1", "L1", "New"),
                index: Some(1),
            })
            .unwrap();
        store
            .apply(Mutation::Replace {
                old_id: "local-1".to_string(),
                card: Card::new("real-1", "L1", "New"),
            })
            .unwrap();
        assert_eq!(ids(&store, "L1"), vec!["a", "real-1", "b"]);
        assert!(!store.contains("local-1"));
        assert!(store.is_consistent());
    }

    #[test]
    fn replace_drops_placeholder_when_confirmed_card_already_present() {
        let mut store = store();
        store
            .apply(Mutation::Insert {
                card: Card::new("local-1", "L1", "New"),
                index: None,
            })
            .unwrap();
        store
            .apply(Mutation::Insert {
                card: Card::new("real-1", "L1", "New"),
                index: None,
            })
            .unwrap();
        store
            .apply(Mutation::Replace {
                old_id: "local-1".to_string(),
                card: Card::new("real-1", "L1", "New"),
            })
            .unwrap();
        assert_eq!(ids(&store, "L1"), vec!["a", "b", "real-1"]);
    }

    #[test]
    fn subscribers_see_affected_lists() {
        let mut store = store();
        let mut rx = store.subscribe();
        store
            .apply(Mutation::Remove {
                card_id: "c".to_string(),
            })
            .unwrap();
        let change = rx.try_recv().unwrap();
        assert_eq!(change.list_ids(), vec!["L2"]);
        assert!(change.list("L2").unwrap().cards.is_empty());
    }

    #[test]
    fn remove_of_absent_card_is_a_noop() {
        let mut store = store();
        let out = store
            .apply(Mutation::Remove {
                card_id: "zzz".to_string(),
            })
            .unwrap();
        assert!(out.is_none());
    }
}
