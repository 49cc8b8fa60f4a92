//! Canonical deltas and the normalizers that produce them.
//!
//! Every producer of change (local REST responses, the broadcast channel,
//! the upstream webhook feed) is reduced to a [`Delta`] before anything
//! touches the board store.

pub mod normalize;
pub mod webhook;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::board::{Card, CardPatch};

pub use normalize::{normalize_broadcast, normalize_rest, normalize_webhook, RawEvent};

/// Where a delta came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Local,
    Broadcast,
    Webhook,
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Broadcast => f.write_str("broadcast"),
            Self::Webhook => f.write_str("webhook"),
        }
    }
}

/// Ties a local intent to its optimistic delta and its eventual response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// The state change a delta describes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum DeltaKind {
    /// A card appeared. `index` is the insertion point; `None` appends.
    Created { card: Card, index: Option<usize> },
    /// Text fields of a card changed in place.
    Updated { card_id: String, fields: CardPatch },
    /// A card changed owning list (or position). `from_list_id` is the
    /// producer's belief about the source list and may be stale.
    Moved {
        card_id: String,
        from_list_id: Option<String>,
        to_list_id: String,
        index: Option<usize>,
        #[serde(default)]
        fields: CardPatch,
    },
    Archived { card_id: String },
    Deleted { card_id: String },
    /// An optimistic placeholder was confirmed upstream under a real id.
    Rekeyed { provisional_id: String, card: Card },
}

/// Discriminant of [`DeltaKind`], used in dedup keys and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeltaTag {
    Created,
    Updated,
    Moved,
    Archived,
    Deleted,
    Rekeyed,
}

impl std::fmt::Display for DeltaTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Moved => "moved",
            Self::Archived => "archived",
            Self::Deleted => "deleted",
            Self::Rekeyed => "rekeyed",
        };
        f.write_str(s)
    }
}

/// An immutable, source-tagged record of one state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delta {
    #[serde(flatten)]
    pub kind: DeltaKind,
    pub channel: Channel,
    /// Timestamp assigned by the producer, when it supplies one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation: Option<CorrelationId>,
}

impl Delta {
    pub fn new(kind: DeltaKind, channel: Channel) -> Self {
        Self {
            kind,
            channel,
            source_time: None,
            correlation: None,
        }
    }

    pub fn created(card: Card, index: Option<usize>, channel: Channel) -> Self {
        Self::new(DeltaKind::Created { card, index }, channel)
    }

    pub fn updated(card_id: impl Into<String>, fields: CardPatch, channel: Channel) -> Self {
        Self::new(
            DeltaKind::Updated {
                card_id: card_id.into(),
                fields,
            },
            channel,
        )
    }

    pub fn moved(
        card_id: impl Into<String>,
        from_list_id: Option<String>,
        to_list_id: impl Into<String>,
        index: Option<usize>,
        channel: Channel,
    ) -> Self {
        Self::new(
            DeltaKind::Moved {
                card_id: card_id.into(),
                from_list_id,
                to_list_id: to_list_id.into(),
                index,
                fields: CardPatch::default(),
            },
            channel,
        )
    }

    pub fn archived(card_id: impl Into<String>, channel: Channel) -> Self {
        Self::new(
            DeltaKind::Archived {
                card_id: card_id.into(),
            },
            channel,
        )
    }

    pub fn deleted(card_id: impl Into<String>, channel: Channel) -> Self {
        Self::new(
            DeltaKind::Deleted {
                card_id: card_id.into(),
            },
            channel,
        )
    }

    pub fn with_source_time(mut self, at: DateTime<Utc>) -> Self {
        self.source_time = Some(at);
        self
    }

    pub fn with_correlation(mut self, correlation: CorrelationId) -> Self {
        self.correlation = Some(correlation);
        self
    }

    /// The card this delta is about. For `Rekeyed` that is the confirmed id.
    pub fn card_id(&self) -> &str {
        match &self.kind {
            DeltaKind::Created { card, .. } | DeltaKind::Rekeyed { card, .. } => &card.id,
            DeltaKind::Updated { card_id, .. }
            | DeltaKind::Moved { card_id, .. }
            | DeltaKind::Archived { card_id }
            | DeltaKind::Deleted { card_id } => card_id,
        }
    }

    pub fn tag(&self) -> DeltaTag {
        match &self.kind {
            DeltaKind::Created { .. } => DeltaTag::Created,
            DeltaKind::Updated { .. } => DeltaTag::Updated,
            DeltaKind::Moved { .. } => DeltaTag::Moved,
            DeltaKind::Archived { .. } => DeltaTag::Archived,
            DeltaKind::Deleted { .. } => DeltaTag::Deleted,
            DeltaKind::Rekeyed { .. } => DeltaTag::Rekeyed,
        }
    }

    /// Archive and delete both take the card off the board and leave a tombstone.
    pub fn is_removal(&self) -> bool {
        matches!(
            self.kind,
            DeltaKind::Archived { .. } | DeltaKind::Deleted { .. }
        )
    }

    /// Content summary that two copies of the same change share.
    pub fn fingerprint(&self) -> String {
        match &self.kind {
            DeltaKind::Created { card, .. } | DeltaKind::Rekeyed { card, .. } => {
                format!("list={}", card.id_list)
            }
            DeltaKind::Updated { fields, .. } => fields.fingerprint(),
            DeltaKind::Moved {
                from_list_id,
                to_list_id,
                fields,
                ..
            } => format!(
                "{}->{}|{}",
                from_list_id.as_deref().unwrap_or("?"),
                to_list_id,
                fields.fingerprint()
            ),
            DeltaKind::Archived { .. } | DeltaKind::Deleted { .. } => String::new(),
        }
    }
}
