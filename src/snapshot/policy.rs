//! Snapshot policies
//!
//! Decide at which sequence numbers a snapshot should exist.

/// Default number of events between snapshots
pub const DEFAULT_SNAPSHOT_INTERVAL: i64 = 50;

pub trait SnapshotPolicy: Send + Sync {
    /// Whether the event with this sequence number should trigger a snapshot
    fn should_snapshot(&self, sequence_number: i64) -> bool;

    /// Most recent sequence number at or below `head` that should have a snapshot
    fn latest_due(&self, head: i64) -> Option<i64>;
}

/// Snapshot whenever the sequence number is a multiple of `interval`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EveryNEvents {
    interval: i64,
}

impl EveryNEvents {
    /// A non-positive interval disables snapshotting
    pub fn new(interval: i64) -> Self {
        Self { interval }
    }

    pub fn interval(&self) -> i64 {
        self.interval
    }
}

impl Default for EveryNEvents {
    fn default() -> Self {
        Self::new(DEFAULT_SNAPSHOT_INTERVAL)
    }
}

impl SnapshotPolicy for EveryNEvents {
    fn should_snapshot(&self, sequence_number: i64) -> bool {
        self.interval > 0 && sequence_number > 0 && sequence_number % self.interval == 0
    }

    fn latest_due(&self, head: i64) -> Option<i64> {
        if self.interval <= 0 {
            return None;
        }
        let due = head - head.rem_euclid(self.interval);
        (due > 0).then_some(due)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_interval_is_fifty() {
        let policy = EveryNEvents::default();
        assert_eq!(policy.interval(), 50);
        assert!(!policy.should_snapshot(1));
        assert!(!policy.should_snapshot(49));
        assert!(policy.should_snapshot(50));
        assert!(policy.should_snapshot(100));
        assert!(!policy.should_snapshot(0));
    }

    #[test]
    fn test_latest_due() {
        let policy = EveryNEvents::new(50);
        assert_eq!(policy.latest_due(0), None);
        assert_eq!(policy.latest_due(49), None);
        assert_eq!(policy.latest_due(50), Some(50));
        assert_eq!(policy.latest_due(137), Some(100));
    }

    #[test]
    fn test_disabled_policy() {
        let policy = EveryNEvents::new(0);
        assert!(!policy.should_snapshot(50));
        assert_eq!(policy.latest_due(500), None);
    }
}
