//! Copy-on-write stats cell shared by every adapter

use std::sync::Arc;

use contracts::DistributorStats;
use parking_lot::RwLock;

/// Holder of the latest [`DistributorStats`] snapshot.
///
/// Writers clone the current snapshot, mutate the clone and swap it in;
/// readers get an `Arc` that never changes under them.
#[derive(Debug, Default)]
pub struct StatsCell {
    current: RwLock<Arc<DistributorStats>>,
}

impl StatsCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest snapshot
    pub fn snapshot(&self) -> Arc<DistributorStats> {
        Arc::clone(&self.current.read())
    }

    /// Apply `f` to a copy and publish it
    pub fn update(&self, f: impl FnOnce(&mut DistributorStats)) {
        let mut guard = self.current.write();
        let mut next = DistributorStats::clone(&guard);
        f(&mut next);
        *guard = Arc::new(next);
    }

    /// Fold one completed send
    pub fn record_send(&self, success: bool, duration_ms: i64, bytes: u64) {
        let at = contracts::now_millis();
        self.update(|s| s.record_send(success, duration_ms, bytes, at));
    }

    /// Fold one request/response exchange, reply bytes included
    pub fn record_exchange(&self, success: bool, duration_ms: i64, sent: u64, received: u64) {
        let at = contracts::now_millis();
        self.update(|s| {
            s.record_send(success, duration_ms, sent, at);
            s.bytes_received += received;
        });
    }

    /// Start over (full adapter restart)
    pub fn reset(&self) {
        *self.current.write() = Arc::new(DistributorStats::default());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_is_immutable() {
        let cell = StatsCell::new();
        let before = cell.snapshot();
        cell.record_send(true, 10, 100);
        let after = cell.snapshot();

        assert_eq!(before.messages_attempted, 0);
        assert_eq!(after.messages_attempted, 1);
        assert_eq!(after.bytes_transmitted, 100);
        assert!(after.last_activity.is_some());
    }

    #[test]
    fn test_exchange_publishes_send_and_reply_together() {
        let cell = StatsCell::new();
        let before = cell.snapshot();
        cell.record_exchange(true, 12, 30, 64);
        let after = cell.snapshot();

        assert_eq!(before.bytes_received, 0);
        assert_eq!(before.messages_attempted, 0);
        assert_eq!(after.messages_attempted, 1);
        assert_eq!(after.bytes_transmitted, 30);
        assert_eq!(after.bytes_received, 64);
    }

    #[test]
    fn test_running_average() {
        let cell = StatsCell::new();
        cell.record_send(true, 10, 0);
        cell.record_send(false, 20, 0);
        cell.record_send(true, 30, 0);
        let stats = cell.snapshot();
        assert!((stats.average_latency_ms - 20.0).abs() < 1e-9);
        assert_eq!(stats.messages_succeeded, 2);
        assert_eq!(stats.messages_failed, 1);
    }

    #[test]
    fn test_update_counts_connections() {
        let cell = StatsCell::new();
        cell.update(|s| {
            s.connections_total += 1;
            s.active_connections = 1;
        });
        assert_eq!(cell.snapshot().active_connections, 1);
        cell.reset();
        assert_eq!(cell.snapshot().connections_total, 0);
    }
}
