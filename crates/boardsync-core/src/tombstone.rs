//! Time-bounded markers for removed card ids.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

/// Card ids that were archived or deleted recently.
///
/// A live tombstone blocks every later non-`Created` delta for its id, so a
/// late `Updated` or `Moved` cannot bring the card back.
#[derive(Debug, Clone)]
pub struct Tombstones {
    ttl: Duration,
    expires: HashMap<String, DateTime<Utc>>,
}

impl Tombstones {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            expires: HashMap::new(),
        }
    }

    /// Create or refresh the tombstone for `card_id`.
    pub fn bury(&mut self, card_id: &str, now: DateTime<Utc>) {
        self.expires.insert(card_id.to_string(), now + self.ttl);
    }

    /// Whether `card_id` has a tombstone that has not expired at `now`.
    pub fn is_live(&self, card_id: &str, now: DateTime<Utc>) -> bool {
        self.expires.get(card_id).is_some_and(|at| *at > now)
    }

    /// Drop the tombstone for `card_id`. Returns true if one existed.
    pub fn clear(&mut self, card_id: &str) -> bool {
        self.expires.remove(card_id).is_some()
    }

    /// Remove expired tombstones, returning how many were dropped.
    pub fn prune(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.expires.len();
        self.expires.retain(|_, at| *at > now);
        before - self.expires.len()
    }

    pub fn len(&self) -> usize {
        self.expires.len()
    }

    pub fn is_empty(&self) -> bool {
        self.expires.is_empty()
    }
}
