//! DistributorStats - per-adapter counters

use serde::{Deserialize, Serialize};

/// Immutable snapshot of one adapter's counters.
///
/// Adapters never mutate a published snapshot; they build the next one
/// and swap it in whole, so readers always see a consistent set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DistributorStats {
    pub messages_attempted: u64,
    pub messages_succeeded: u64,
    pub messages_failed: u64,
    pub bytes_transmitted: u64,
    pub bytes_received: u64,
    /// Running mean over completed sends
    pub average_latency_ms: f64,
    /// Currently connected clients (servers only)
    pub active_connections: u64,
    /// Clients ever accepted (servers only)
    pub connections_total: u64,
    /// Clients removed by heartbeat or failed writes
    pub clients_evicted: u64,
    /// Epoch ms of the last send or inbound frame
    pub last_activity: Option<i64>,
}

impl DistributorStats {
    /// Fold one completed send into the counters.
    ///
    /// `newAvg = (oldAvg * n + duration) / (n + 1)` where `n` is the number
    /// of sends completed before this one.
    pub fn record_send(&mut self, success: bool, duration_ms: i64, bytes: u64, at: i64) {
        let n = self.messages_succeeded + self.messages_failed;
        self.messages_attempted += 1;
        if success {
            self.messages_succeeded += 1;
        } else {
            self.messages_failed += 1;
        }
        self.bytes_transmitted += bytes;
        self.average_latency_ms =
            (self.average_latency_ms * n as f64 + duration_ms.max(0) as f64) / (n + 1) as f64;
        self.last_activity = Some(at);
    }

    /// Success ratio in [0, 1]; 0 when nothing was sent
    pub fn success_rate(&self) -> f64 {
        let done = self.messages_succeeded + self.messages_failed;
        if done == 0 {
            0.0
        } else {
            self.messages_succeeded as f64 / done as f64
        }
    }
}
