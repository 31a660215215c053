//! # Dispatcher
//!
//! Protocol adapters and the coordinator that fans envelopes out to them.
//!
//! Responsibilities:
//! - HTTP, UDP, WebSocket and SSE implementations of `ProtocolAdapter`
//! - Event routing and concurrent fan-out (`Coordinator`)
//! - Client registries and heartbeat eviction for the streaming servers
//! - Legacy head-pose datagrams and the discovery beacon

pub mod adapters;
pub mod clients;
pub mod coordinator;
pub mod discovery;
pub mod error;
pub mod heartbeat;
pub mod legacy;
pub mod metrics;
mod server;

pub use adapters::{
    create_adapter, HttpAdapter, SseAdapter, SseFrame, UdpAdapter, WebSocketAdapter,
};
pub use contracts::{PayloadEnvelope, ProtocolAdapter};
pub use coordinator::{Coordinator, DistributionReport};
pub use discovery::{Announcement, DiscoveryAnnouncer};
pub use error::DispatcherError;
pub use heartbeat::SweepReport;
pub use legacy::HeadPosePacket;
pub use metrics::StatsCell;
