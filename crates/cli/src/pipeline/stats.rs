//! Pipeline statistics.

use std::collections::BTreeMap;
use std::time::Duration;

use contracts::DistributorStats;
use observability::DistributionAggregator;

/// Statistics from a pipeline run
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    /// Non-empty input lines
    pub messages_read: u64,

    /// Envelopes handed to the coordinator
    pub distributed: u64,

    /// Lines that did not parse as an envelope
    pub malformed: u64,

    /// Total duration of the pipeline run
    pub duration: Duration,

    /// Per-protocol outcome aggregate
    pub aggregator: DistributionAggregator,

    /// Final adapter counters, taken just before shutdown
    pub adapters: BTreeMap<String, DistributorStats>,
}

impl PipelineStats {
    /// Envelopes per second
    pub fn throughput(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.distributed as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }

    /// Print detailed summary
    pub fn print_summary(&self) {
        println!("\n=== Pipeline Statistics ===\n");
        println!("Duration: {:.2}s", self.duration.as_secs_f64());
        println!("Lines read: {}", self.messages_read);
        println!("Distributed: {}", self.distributed);
        println!("Malformed: {}", self.malformed);
        println!("Throughput: {:.2} msg/s\n", self.throughput());

        print!("{}", self.aggregator.summary());

        if !self.adapters.is_empty() {
            println!("\n=== Adapters ===");
            for (name, stats) in &self.adapters {
                println!(
                    "{name}: {} sent, {} failed, {} bytes out, avg {:.2}ms",
                    stats.messages_succeeded,
                    stats.messages_failed,
                    stats.bytes_transmitted,
                    stats.average_latency_ms
                );
                if stats.connections_total > 0 {
                    println!(
                        "  clients: {} active, {} total, {} evicted",
                        stats.active_connections, stats.connections_total, stats.clients_evicted
                    );
                }
            }
        }

        println!();
    }
}
