//! ProtocolAdapter trait - the contract every transport implements

use async_trait::async_trait;
use serde_json::Value;

use crate::{AdapterResult, ContractError, DistributorStats, Payload, TargetConfig};

/// Shared shape of every distribution transport.
///
/// Implementations own their sockets, client registries and timers
/// privately; callers only ever see this interface, usually behind an
/// `Arc<dyn ProtocolAdapter>`.
#[async_trait]
pub trait ProtocolAdapter: Send + Sync {
    /// Protocol tag (used for logging/metrics and as the registry key)
    fn protocol(&self) -> &str;

    /// Feature tags such as `"broadcast"` or `"bidirectional"`
    fn capabilities(&self) -> Vec<String>;

    /// Deliver one payload.
    ///
    /// Never fails: every failure path is folded into an
    /// [`AdapterResult`] with `success = false` and a stable code.
    async fn send(&self, payload: &Payload, target: &TargetConfig) -> AdapterResult;

    /// Bounded-time liveness probe without caller-visible side effects
    async fn health_check(&self) -> bool;

    /// Deep-merge `partial` over the current settings.
    ///
    /// # Errors
    /// Returns the validation error and keeps the previous settings when
    /// the merged result is invalid.
    fn configure(&self, partial: &Value) -> Result<(), ContractError>;

    /// Latest counters snapshot
    fn stats(&self) -> DistributorStats;

    /// Bind listeners / start background tasks (servers only)
    async fn start(&self) -> Result<(), ContractError> {
        Ok(())
    }

    /// Release sockets, close client streams, stop timers
    async fn shutdown(&self) {}
}
