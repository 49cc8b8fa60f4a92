//! Dedup/idempotence filter.
//!
//! Decides whether a normalized delta reaches the reconciler. It remembers
//! recently admitted deltas for a bounded retention window and consults the
//! tombstone set so removed cards stay removed.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::delta::{Delta, DeltaTag};
use crate::tombstone::Tombstones;

/// Identity of a change for duplicate detection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub card_id: String,
    pub tag: DeltaTag,
    pub fingerprint: String,
}

impl DedupKey {
    pub fn of(delta: &Delta) -> Self {
        Self {
            card_id: delta.card_id().to_string(),
            tag: delta.tag(),
            fingerprint: delta.fingerprint(),
        }
    }
}

#[derive(Debug, Clone)]
struct Seen {
    source_time: Option<DateTime<Utc>>,
    expires: DateTime<Utc>,
}

/// What the filter decided for one delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Forward to the reconciler.
    Admit,
    /// A `Created` for a tombstoned id; the tombstone was cleared and the
    /// delta is forwarded.
    Supersede,
    /// Same change already applied within the retention window.
    Duplicate,
    /// The card was removed and its tombstone is still live.
    Tombstoned,
}

impl Verdict {
    pub fn admitted(self) -> bool {
        matches!(self, Self::Admit | Self::Supersede)
    }
}

/// Short-lived record of applied deltas.
#[derive(Debug, Clone)]
pub struct DedupFilter {
    retention: Duration,
    seen: HashMap<DedupKey, Seen>,
}

impl DedupFilter {
    pub fn new(retention: Duration) -> Self {
        Self {
            retention,
            seen: HashMap::new(),
        }
    }

    /// Classify `delta` without changing any state.
    ///
    /// A live tombstone decides first: a `Created` always recreates the card.
    pub fn check(&self, delta: &Delta, tombstones: &Tombstones, now: DateTime<Utc>) -> Verdict {
        if tombstones.is_live(delta.card_id(), now) {
            return if delta.tag() == DeltaTag::Created {
                Verdict::Supersede
            } else {
                Verdict::Tombstoned
            };
        }
        if self.is_duplicate(delta, now) {
            return Verdict::Duplicate;
        }
        Verdict::Admit
    }

    /// Classify `delta` and, if admitted, record it and clear a superseded tombstone.
    pub fn admit(&mut self, delta: &Delta, tombstones: &mut Tombstones, now: DateTime<Utc>) -> Verdict {
        let verdict = self.check(delta, tombstones, now);
        match verdict {
            Verdict::Supersede => {
                tombstones.clear(delta.card_id());
                debug!(card_id = %delta.card_id(), channel = %delta.channel, "Created supersedes tombstone");
                self.record(delta, now);
            }
            Verdict::Admit => self.record(delta, now),
            Verdict::Duplicate | Verdict::Tombstoned => {}
        }
        verdict
    }

    /// Remember `delta` as the latest change applied to its card until the
    /// retention window passes.
    ///
    /// Earlier records for the same card are dropped, so only an echo of the
    /// most recent change counts as a duplicate.
    pub fn record(&mut self, delta: &Delta, now: DateTime<Utc>) {
        let key = DedupKey::of(delta);
        self.seen
            .retain(|seen, _| seen.card_id != key.card_id || *seen == key);
        self.seen.insert(
            key,
            Seen {
                source_time: delta.source_time,
                expires: now + self.retention,
            },
        );
    }

    /// Forget every recorded delta for `card_id`.
    pub fn forget(&mut self, card_id: &str) {
        self.seen.retain(|key, _| key.card_id != card_id);
    }

    /// Drop entries whose retention window has passed.
    pub fn prune(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.seen.len();
        self.seen.retain(|_, seen| seen.expires > now);
        before - self.seen.len()
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    fn is_duplicate(&self, delta: &Delta, now: DateTime<Utc>) -> bool {
        let Some(seen) = self.seen.get(&DedupKey::of(delta)) else {
            return false;
        };
        if seen.expires <= now {
            return false;
        }
        // Two producers that both stamp the change must agree on when it happened.
        match (seen.source_time, delta.source_time) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }
}

/// Removals waiting further down a batch of queued events.
///
/// An `Updated` or `Moved` for a card that a later event in the same batch
/// archives or deletes is superseded and never reaches the store.
#[derive(Debug, Clone, Default)]
pub struct PendingRemovals {
    last: HashMap<String, usize>,
}

impl PendingRemovals {
    /// Collect the position of the last removal per card from `(position, delta)` pairs.
    pub fn scan<'a>(deltas: impl IntoIterator<Item = (usize, &'a Delta)>) -> Self {
        let mut removals = Self::default();
        for (position, delta) in deltas {
            if delta.is_removal() {
                removals.note(position, delta.card_id());
            }
        }
        removals
    }

    pub fn note(&mut self, position: usize, card_id: &str) {
        let entry = self.last.entry(card_id.to_string()).or_insert(position);
        *entry = (*entry).max(position);
    }

    /// Whether `delta`, found at `position`, is made moot by a later removal.
    pub fn supersedes(&self, position: usize, delta: &Delta) -> bool {
        matches!(delta.tag(), DeltaTag::Updated | DeltaTag::Moved)
            && self
                .last
                .get(delta.card_id())
                .is_some_and(|removed_at| *removed_at > position)
    }

    pub fn is_empty(&self) -> bool {
        self.last.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{Card, CardPatch};
    use crate::delta::Channel;

    fn filter() -> (DedupFilter, Tombstones) {
        (
            DedupFilter::new(Duration::seconds(30)),
            Tombstones::new(Duration::seconds(60)),
        )
    }

    #[test]
    fn echo_within_window_is_duplicate() {
        let (mut filter, mut stones) = filter();
        let now = Utc::now();
        let local = Delta::moved("c1", Some("L1".into()), "L2", Some(0), Channel::Local);
        let echo = Delta::moved("c1", Some("L1".into()), "L2", None, Channel::Webhook);

        assert_eq!(filter.admit(&local, &mut stones, now), Verdict::Admit);
        assert_eq!(filter.admit(&echo, &mut stones, now + Duration::seconds(2)), Verdict::Duplicate);
        assert_eq!(
            filter.admit(&echo, &mut stones, now + Duration::seconds(31)),
            Verdict::Admit
        );
    }

    #[test]
    fn differing_source_times_are_distinct_changes() {
        let (mut filter, mut stones) = filter();
        let now = Utc::now();
        let first = Delta::updated("c1", CardPatch::name("x"), Channel::Webhook).with_source_time(now);
        let second = Delta::updated("c1", CardPatch::name("x"), Channel::Webhook)
            .with_source_time(now + Duration::seconds(5));
        assert_eq!(filter.admit(&first, &mut stones, now), Verdict::Admit);
        assert_eq!(filter.admit(&second, &mut stones, now), Verdict::Admit);
        assert_eq!(filter.admit(&second, &mut stones, now), Verdict::Duplicate);
    }

    #[test]
    fn tombstone_blocks_everything_but_created() {
        let (mut filter, mut stones) = filter();
        let now = Utc::now();
        stones.bury("c1", now);

        let update = Delta::updated("c1", CardPatch::name("x"), Channel::Webhook);
        assert_eq!(filter.admit(&update, &mut stones, now), Verdict::Tombstoned);
        let moved = Delta::moved("c1", None, "L2", None, Channel::Broadcast);
        assert_eq!(filter.admit(&moved, &mut stones, now), Verdict::Tombstoned);

        let created = Delta::created(Card::new("c1", "L1", "again"), None, Channel::Webhook);
        assert_eq!(filter.admit(&created, &mut stones, now), Verdict::Supersede);
        assert!(!stones.is_live("c1", now));
    }

    #[test]
    fn created_over_live_tombstone_is_never_a_duplicate() {
        let (mut filter, mut stones) = filter();
        let now = Utc::now();
        let created = Delta::created(Card::new("c1", "L1", "n"), None, Channel::Local);
        filter.admit(&created, &mut stones, now);
        stones.bury("c1", now);
        let again = Delta::created(Card::new("c1", "L1", "n"), None, Channel::Webhook);
        assert_eq!(filter.admit(&again, &mut stones, now), Verdict::Supersede);
        assert!(!stones.is_live("c1", now));
    }

    #[test]
    fn newer_change_retires_older_records() {
        let (mut filter, mut stones) = filter();
        let now = Utc::now();
        let there = Delta::moved("c1", Some("L1".into()), "L2", None, Channel::Broadcast);
        let back = Delta::moved("c1", Some("L2".into()), "L1", None, Channel::Broadcast);

        assert_eq!(filter.admit(&there, &mut stones, now), Verdict::Admit);
        assert_eq!(filter.admit(&back, &mut stones, now), Verdict::Admit);
        assert_eq!(filter.len(), 1);
        assert_eq!(filter.admit(&there, &mut stones, now), Verdict::Admit);
        assert_eq!(filter.admit(&there, &mut stones, now), Verdict::Duplicate);
    }

    #[test]
    fn records_are_per_card() {
        let (mut filter, mut stones) = filter();
        let now = Utc::now();
        let c1 = Delta::updated("c1", CardPatch::name("x"), Channel::Broadcast);
        let c2 = Delta::updated("c2", CardPatch::name("y"), Channel::Broadcast);
        filter.admit(&c1, &mut stones, now);
        filter.admit(&c2, &mut stones, now);
        assert_eq!(filter.admit(&c1, &mut stones, now), Verdict::Duplicate);
    }

    #[test]
    fn later_removal_supersedes_queued_updates() {
        let batch = vec![
            Delta::updated("c1", CardPatch::name("x"), Channel::Webhook),
            Delta::moved("c2", None, "L2", None, Channel::Broadcast),
            Delta::moved("c1", None, "L2", None, Channel::Broadcast),
            Delta::deleted("c1", Channel::Broadcast),
            Delta::updated("c1", CardPatch::name("late"), Channel::Webhook),
        ];
        let removals = PendingRemovals::scan(batch.iter().enumerate());
        let kept: Vec<(DeltaTag, &str)> = batch
            .iter()
            .enumerate()
            .filter(|(i, d)| !removals.supersedes(*i, d))
            .map(|(_, d)| (d.tag(), d.card_id()))
            .collect();
        assert_eq!(
            kept,
            vec![
                (DeltaTag::Moved, "c2"),
                (DeltaTag::Deleted, "c1"),
                (DeltaTag::Updated, "c1"),
            ]
        );
    }

    #[test]
    fn created_is_never_superseded() {
        let mut removals = PendingRemovals::default();
        removals.note(3, "c1");
        let created = Delta::created(Card::new("c1", "L1", "n"), None, Channel::Webhook);
        assert!(!removals.supersedes(0, &created));
        assert!(removals.supersedes(0, &Delta::updated("c1", CardPatch::name("y"), Channel::Webhook)));
        assert!(!removals.supersedes(4, &Delta::updated("c1", CardPatch::name("y"), Channel::Webhook)));
    }

    #[test]
    fn prune_and_forget() {
        let (mut filter, mut stones) = filter();
        let now = Utc::now();
        filter.admit(&Delta::archived("c1", Channel::Local), &mut stones, now);
        filter.admit(&Delta::archived("c2", Channel::Local), &mut stones, now);
        filter.forget("c1");
        assert_eq!(filter.len(), 1);
        assert_eq!(filter.prune(now + Duration::seconds(31)), 1);
        assert!(filter.is_empty());
    }
}
