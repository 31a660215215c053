//! Coordinator - routes each envelope to its distributors and fans out

use std::collections::BTreeMap;
use std::sync::Arc;

use contracts::{
    AdapterResult, ContractError, DistributorKind, DistributorStats, EventRouter,
    PayloadEnvelope, ProtocolAdapter, SessionConfig,
};
use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::adapters::create_adapter;
use crate::error::DispatcherError;

/// Outcome of one `distribute` call, keyed by distributor name
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DistributionReport {
    pub event: String,
    pub results: BTreeMap<String, AdapterResult>,
}

impl DistributionReport {
    pub fn succeeded(&self) -> usize {
        self.results.values().filter(|r| r.success).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    /// True when at least one distributor ran and none failed
    pub fn all_succeeded(&self) -> bool {
        !self.results.is_empty() && self.failed() == 0
    }
}

/// Owns the adapters of a session and the compiled routing table
pub struct Coordinator {
    adapters: BTreeMap<String, Arc<dyn ProtocolAdapter>>,
    router: EventRouter,
}

impl Coordinator {
    /// Coordinator with no adapters yet
    pub fn new(router: EventRouter) -> Self {
        Self {
            adapters: BTreeMap::new(),
            router,
        }
    }

    /// Build every enabled distributor of `session`.
    ///
    /// MQTT is validated by the config layer but has no adapter; it is
    /// skipped with a warning.
    #[instrument(name = "coordinator_from_session", skip(session), fields(session = %session.session_id))]
    pub fn from_session(session: &SessionConfig) -> Result<Self, DispatcherError> {
        let router = EventRouter::new(&session.event_routing)?;
        let mut coordinator = Self::new(router);

        for name in session.enabled_names() {
            if DistributorKind::from_name(&name) == Some(DistributorKind::Mqtt) {
                warn!(distributor = %name, "no adapter for this distributor, skipping");
                continue;
            }
            let fragment = session.distributors.get(&name).unwrap_or(&Value::Null);
            let adapter = create_adapter(&name, fragment)
                .map_err(|e| DispatcherError::adapter_creation(&name, e.to_string()))?;
            coordinator.register(name, adapter);
        }

        info!(adapters = ?coordinator.protocols(), "coordinator ready");
        Ok(coordinator)
    }

    /// Add or replace an adapter; returns the one it replaced
    pub fn register(
        &mut self,
        name: impl Into<String>,
        adapter: Arc<dyn ProtocolAdapter>,
    ) -> Option<Arc<dyn ProtocolAdapter>> {
        self.adapters.insert(name.into(), adapter)
    }

    pub fn adapter(&self, name: &str) -> Option<Arc<dyn ProtocolAdapter>> {
        self.adapters.get(name).cloned()
    }

    /// Registered distributor names, sorted
    pub fn protocols(&self) -> Vec<String> {
        self.adapters.keys().cloned().collect()
    }

    /// Registered distributors that receive `event`
    pub fn resolve(&self, event: &str) -> Vec<String> {
        if self.router.is_empty() {
            return self.protocols();
        }
        let mut names: Vec<String> = Vec::new();
        for name in self.router.resolve(event).unwrap_or_default() {
            if self.adapters.contains_key(name) && !names.contains(name) {
                names.push(name.clone());
            }
        }
        names
    }

    /// Send `envelope` to every resolved distributor concurrently
    #[instrument(name = "coordinator_distribute", skip(self, envelope), fields(event = %envelope.event))]
    pub async fn distribute(&self, envelope: &PayloadEnvelope) -> DistributionReport {
        let names = self.resolve(&envelope.event);
        if names.is_empty() {
            debug!("no distributor routed for event");
        }

        let sends = names.into_iter().filter_map(|name| {
            let adapter = self.adapters.get(&name)?;
            let target = envelope.target_for(&name);
            Some(async move {
                let result = adapter.send(&envelope.payload, &target).await;
                (name, result)
            })
        });
        let results: BTreeMap<String, AdapterResult> = join_all(sends).await.into_iter().collect();

        observability::record_distribution(&envelope.event, results.len());
        for (name, result) in &results {
            if !result.success {
                debug!(distributor = %name, code = ?result.code, error = ?result.error, "distribution failed");
            }
        }

        DistributionReport {
            event: envelope.event.clone(),
            results,
        }
    }

    /// Start every adapter; on failure the ones already started are stopped
    #[instrument(name = "coordinator_start_all", skip(self))]
    pub async fn start_all(&self) -> Result<(), DispatcherError> {
        let mut started: Vec<&Arc<dyn ProtocolAdapter>> = Vec::new();
        for (name, adapter) in &self.adapters {
            if let Err(source) = adapter.start().await {
                for adapter in started {
                    adapter.shutdown().await;
                }
                return Err(DispatcherError::AdapterStart {
                    name: name.clone(),
                    source,
                });
            }
            started.push(adapter);
        }
        info!(adapters = self.adapters.len(), "all adapters started");
        Ok(())
    }

    pub async fn health_check_all(&self) -> BTreeMap<String, bool> {
        let checks = self.adapters.iter().map(|(name, adapter)| async move {
            (name.clone(), adapter.health_check().await)
        });
        join_all(checks).await.into_iter().collect()
    }

    /// Apply a partial settings update to one adapter
    pub fn configure(&self, name: &str, partial: &Value) -> Result<(), DispatcherError> {
        let adapter = self
            .adapters
            .get(name)
            .ok_or_else(|| ContractError::UnsupportedDistributor {
                name: name.to_string(),
            })?;
        adapter.configure(partial)?;
        Ok(())
    }

    pub fn stats(&self) -> BTreeMap<String, DistributorStats> {
        self.adapters
            .iter()
            .map(|(name, adapter)| (name.clone(), adapter.stats()))
            .collect()
    }

    #[instrument(name = "coordinator_shutdown", skip(self))]
    pub async fn shutdown(&self) {
        join_all(self.adapters.values().map(|adapter| adapter.shutdown())).await;
        info!("coordinator shutdown complete");
    }
}
