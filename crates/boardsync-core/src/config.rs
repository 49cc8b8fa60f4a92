//! Engine tuning knobs.

use std::time::Duration;

/// Default retention of recently applied deltas, in seconds.
pub const DEFAULT_DEDUP_RETENTION_SECS: u64 = 30;

/// Default tombstone lifetime, in seconds.
pub const DEFAULT_TOMBSTONE_TTL_SECS: u64 = 60;

/// Default time a local mutation may stay unconfirmed, in seconds.
pub const DEFAULT_PENDING_TIMEOUT_SECS: u64 = 15;

/// Shortest prune interval; a zero period would stall the runtime timer.
pub const MIN_PRUNE_INTERVAL: Duration = Duration::from_millis(1);

/// Windows and capacities used by a board's sync engine and runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub dedup_retention: Duration,
    pub tombstone_ttl: Duration,
    pub pending_timeout: Duration,
    /// How often expired state is pruned and pending mutations are checked.
    pub prune_interval: Duration,
    /// Bound of the runtime command queue.
    pub queue_capacity: usize,
    /// Bound of the store change and notice channels.
    pub notify_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            dedup_retention: Duration::from_secs(DEFAULT_DEDUP_RETENTION_SECS),
            tombstone_ttl: Duration::from_secs(DEFAULT_TOMBSTONE_TTL_SECS),
            pending_timeout: Duration::from_secs(DEFAULT_PENDING_TIMEOUT_SECS),
            prune_interval: Duration::from_secs(5),
            queue_capacity: 256,
            notify_capacity: 100,
        }
    }
}

impl SyncConfig {
    pub fn with_dedup_retention(mut self, retention: Duration) -> Self {
        self.dedup_retention = retention;
        self
    }

    pub fn with_tombstone_ttl(mut self, ttl: Duration) -> Self {
        self.tombstone_ttl = ttl;
        self
    }

    pub fn with_pending_timeout(mut self, timeout: Duration) -> Self {
        self.pending_timeout = timeout;
        self
    }

    pub fn with_prune_interval(mut self, interval: Duration) -> Self {
        self.prune_interval = interval.max(MIN_PRUNE_INTERVAL);
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn with_notify_capacity(mut self, capacity: usize) -> Self {
        self.notify_capacity = capacity.max(1);
        self
    }
}

/// Convert a configured window into the clock arithmetic type used by the engine.
pub(crate) fn window(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(36_500))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.dedup_retention, Duration::from_secs(30));
        assert_eq!(config.tombstone_ttl, Duration::from_secs(60));
        assert_eq!(config.pending_timeout, Duration::from_secs(15));
        assert_eq!(config.queue_capacity, 256);
    }

    #[test]
    fn setters_chain() {
        let config = SyncConfig::default()
            .with_dedup_retention(Duration::from_secs(5))
            .with_queue_capacity(0);
        assert_eq!(config.dedup_retention, Duration::from_secs(5));
        assert_eq!(config.queue_capacity, 1);
        assert_eq!(window(config.dedup_retention), chrono::Duration::seconds(5));
    }

    #[test]
    fn zero_prune_interval_is_clamped() {
        let config = SyncConfig::default().with_prune_interval(Duration::ZERO);
        assert_eq!(config.prune_interval, MIN_PRUNE_INTERVAL);
    }
}
