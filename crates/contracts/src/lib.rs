//! # Contracts
//!
//! Frozen interface contracts shared by every distribution crate: the
//! protocol adapter trait, payload and target descriptors, results, stats
//! and configuration types. Business crates depend on this crate only;
//! reverse dependencies are prohibited.
//!
//! ## Time Model
//! - All timestamps are wall-clock epoch milliseconds (`i64`)
//! - Durations are derived as `end - start` and never negative

mod adapter;
mod client_id;
mod config;
mod error;
mod merge;
mod payload;
mod result;
mod routing;
mod stats;
mod target;

pub use adapter::ProtocolAdapter;
pub use client_id::ClientId;
pub use config::*;
pub use error::*;
pub use merge::{deep_merge, merge_into, merge_layers};
pub use payload::{EnvelopeRecord, Payload, PayloadEnvelope};
pub use result::{AdapterResult, ErrorCode, Timing, TimingGuard};
pub use routing::{EventRouter, RoutePattern};
pub use stats::DistributorStats;
pub use target::{TargetConfig, UdpTarget};

/// Event name that addresses every connected client
pub const BROADCAST_EVENT: &str = "broadcast";

/// Current wall clock in epoch milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
