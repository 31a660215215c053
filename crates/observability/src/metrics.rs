//! Distribution metrics
//!
//! Facade recorders for every adapter send plus an in-memory aggregator
//! for end-of-run summaries.

use std::collections::BTreeMap;

use contracts::AdapterResult;
use metrics::{counter, gauge, histogram};

/// Record one adapter `send`
pub fn record_send(protocol: &str, success: bool, latency_ms: f64, bytes: u64) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "fanout_sends_total",
        "protocol" => protocol.to_string(),
        "status" => status
    )
    .increment(1);

    histogram!("fanout_send_latency_ms", "protocol" => protocol.to_string()).record(latency_ms);

    if bytes > 0 {
        counter!("fanout_bytes_sent_total", "protocol" => protocol.to_string()).increment(bytes);
    }
}

/// Record the live client count of a server adapter
pub fn record_active_connections(protocol: &str, count: usize) {
    gauge!("fanout_active_connections", "protocol" => protocol.to_string()).set(count as f64);
}

/// Record one heartbeat or write-failure eviction
pub fn record_client_evicted(protocol: &str) {
    counter!("fanout_clients_evicted_total", "protocol" => protocol.to_string()).increment(1);
}

/// Record one coordinator fan-out
pub fn record_distribution(event: &str, adapters: usize) {
    counter!("fanout_distributions_total").increment(1);
    histogram!("fanout_distribution_width").record(adapters as f64);
    if adapters == 0 {
        counter!("fanout_unrouted_events_total", "event" => event.to_string()).increment(1);
    }
}

/// Per-protocol aggregate over a run
#[derive(Debug, Clone, Default)]
pub struct DistributionAggregator {
    /// Envelopes handed to the coordinator
    pub total_events: u64,
    /// Envelopes that reached no adapter
    pub unrouted_events: u64,
    protocols: BTreeMap<String, ProtocolTally>,
}

#[derive(Debug, Clone, Default)]
struct ProtocolTally {
    succeeded: u64,
    failed: u64,
    latency: RunningStats,
    error_codes: BTreeMap<String, u64>,
}

impl DistributionAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold in the results of one distribution
    pub fn update<'a>(&mut self, results: impl IntoIterator<Item = (&'a str, &'a AdapterResult)>) {
        self.total_events += 1;
        let mut any = false;
        for (name, result) in results {
            any = true;
            let tally = self.protocols.entry(name.to_string()).or_default();
            if result.success {
                tally.succeeded += 1;
            } else {
                tally.failed += 1;
                if let Some(code) = result.code {
                    *tally.error_codes.entry(code.to_string()).or_insert(0) += 1;
                }
            }
            tally.latency.push(result.timing.duration as f64);
        }
        if !any {
            self.unrouted_events += 1;
        }
    }

    pub fn summary(&self) -> DistributionSummary {
        DistributionSummary {
            total_events: self.total_events,
            unrouted_events: self.unrouted_events,
            protocols: self
                .protocols
                .iter()
                .map(|(name, tally)| {
                    let sends = tally.succeeded + tally.failed;
                    (
                        name.clone(),
                        ProtocolSummary {
                            succeeded: tally.succeeded,
                            failed: tally.failed,
                            success_rate: if sends > 0 {
                                tally.succeeded as f64 / sends as f64 * 100.0
                            } else {
                                0.0
                            },
                            latency_ms: StatsSummary::from(&tally.latency),
                            error_codes: tally.error_codes.clone(),
                        },
                    )
                })
                .collect(),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// End-of-run report
#[derive(Debug, Clone, Default)]
pub struct DistributionSummary {
    pub total_events: u64,
    pub unrouted_events: u64,
    pub protocols: BTreeMap<String, ProtocolSummary>,
}

#[derive(Debug, Clone, Default)]
pub struct ProtocolSummary {
    pub succeeded: u64,
    pub failed: u64,
    pub success_rate: f64,
    pub latency_ms: StatsSummary,
    pub error_codes: BTreeMap<String, u64>,
}

impl std::fmt::Display for DistributionSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Distribution Summary ===")?;
        writeln!(f, "Events: {}", self.total_events)?;
        writeln!(f, "Unrouted events: {}", self.unrouted_events)?;
        for (name, protocol) in &self.protocols {
            writeln!(
                f,
                "{name}: {} ok / {} failed ({:.2}%)",
                protocol.succeeded, protocol.failed, protocol.success_rate
            )?;
            writeln!(f, "  latency (ms): {}", protocol.latency_ms)?;
            for (code, count) in &protocol.error_codes {
                writeln!(f, "  {code}: {count}")?;
            }
        }
        Ok(())
    }
}

/// Descriptive statistics snapshot
#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.3}, max={:.3}, mean={:.3}, std={:.3} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// Online mean/variance (Welford)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);

            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            let delta2 = value - self.mean;
            self.m2 += delta * delta2;
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// Sample variance
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}
