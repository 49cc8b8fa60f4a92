//! Board domain models, shaped like the upstream task API's JSON.

use serde::{Deserialize, Serialize};

/// A board on the upstream service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Board {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// A list (column) within a board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct List {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_board: Option<String>,
    /// Upstream ordering position within the board.
    #[serde(default)]
    pub pos: f64,
    #[serde(default)]
    pub closed: bool,
}

/// A card owned by exactly one list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
    pub id_list: String,
    /// Upstream ordering position within the list. Only used to order a fetched list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pos: Option<f64>,
    #[serde(default)]
    pub closed: bool,
}

impl Card {
    /// Build a card with the fields the engine cares about.
    pub fn new(id: impl Into<String>, id_list: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            desc: None,
            id_list: id_list.into(),
            pos: None,
            closed: false,
        }
    }

    /// Set the description.
    pub fn with_desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = Some(desc.into());
        self
    }

    /// Merge a field patch into this card. Returns true if anything changed.
    pub fn merge(&mut self, patch: &CardPatch) -> bool {
        let mut changed = false;
        if let Some(name) = &patch.name {
            if &self.name != name {
                self.name = name.clone();
                changed = true;
            }
        }
        if let Some(desc) = &patch.desc {
            if self.desc.as_ref() != Some(desc) {
                self.desc = Some(desc.clone());
                changed = true;
            }
        }
        changed
    }
}

/// Field-level changes to a card's text. Absent fields are left untouched.
///
/// The owning list is deliberately not part of a patch: a list change is a
/// move and travels as its own delta.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CardPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
}

impl CardPatch {
    pub fn name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            desc: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.desc.is_none()
    }

    /// The values `card` currently holds for the fields this patch touches.
    ///
    /// Read before a change, applying the result undoes it. A description that was
    /// absent reverts to the empty string, which is how the upstream API
    /// represents "no description".
    pub fn read_from(&self, card: &Card) -> Self {
        Self {
            name: self.name.as_ref().map(|_| card.name.clone()),
            desc: self
                .desc
                .as_ref()
                .map(|_| card.desc.clone().unwrap_or_default()),
        }
    }

    /// Stable textual form used for duplicate detection.
    pub fn fingerprint(&self) -> String {
        format!(
            "name={}|desc={}",
            self.name.as_deref().unwrap_or("\u{0}"),
            self.desc.as_deref().unwrap_or("\u{0}")
        )
    }
}

/// A list and its current ordered card sequence, as handed to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListSnapshot {
    pub list_id: String,
    pub name: String,
    pub cards: Vec<Card>,
}

impl ListSnapshot {
    /// Card ids in order; handy for assertions and logging.
    pub fn card_ids(&self) -> Vec<&str> {
        self.cards.iter().map(|c| c.id.as_str()).collect()
    }
}
