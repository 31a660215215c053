//! UdpAdapter - connectionless datagram fan-out

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use contracts::{
    merge_settings, AdapterResult, ContractError, DistributorKind, DistributorStats, ErrorCode,
    Payload, ProtocolAdapter, TargetConfig, Timing, UdpConfig, UdpTarget,
};
use futures::future::join_all;
use parking_lot::RwLock;
use serde_json::{json, Value};
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use crate::adapters::observe;
use crate::metrics::StatsCell;

const PROTOCOL: &str = "udp";

/// Sends each payload as one datagram to every resolved target
pub struct UdpAdapter {
    config: RwLock<Arc<UdpConfig>>,
    socket: Mutex<Option<Arc<UdpSocket>>>,
    /// Set when socket options change; the cached socket is rebuilt on next use
    socket_dirty: AtomicBool,
    initializations: AtomicU64,
    stats: StatsCell,
}

/// Per-target delivery detail
#[derive(Debug, Clone)]
struct TargetOutcome {
    target: String,
    result: Result<usize, String>,
}

impl TargetOutcome {
    fn to_json(&self) -> Value {
        match &self.result {
            Ok(bytes) => json!({"target": self.target, "success": true, "bytes": bytes}),
            Err(error) => json!({"target": self.target, "success": false, "error": error}),
        }
    }
}

impl UdpAdapter {
    pub fn new(config: UdpConfig) -> Self {
        Self {
            config: RwLock::new(Arc::new(config)),
            socket: Mutex::new(None),
            socket_dirty: AtomicBool::new(false),
            initializations: AtomicU64::new(0),
            stats: StatsCell::new(),
        }
    }

    pub fn config(&self) -> Arc<UdpConfig> {
        Arc::clone(&self.config.read())
    }

    /// How many times the socket has been created
    pub fn socket_initializations(&self) -> u64 {
        self.initializations.load(Ordering::Relaxed)
    }

    /// Local address of the open socket, if any
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        let socket = self.socket.lock().await;
        socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    /// Open the socket on first use, or reopen it after socket options changed
    async fn socket(&self) -> std::io::Result<Arc<UdpSocket>> {
        let mut slot = self.socket.lock().await;
        if self.socket_dirty.swap(false, Ordering::AcqRel) && slot.take().is_some() {
            debug!("UDP socket options changed, reopening");
        }
        if let Some(socket) = slot.as_ref() {
            return Ok(Arc::clone(socket));
        }

        let config = self.config();
        let bind = format!("{}:{}", config.bind_address, config.bind_port.unwrap_or(0));
        let socket = UdpSocket::bind(&bind).await?;
        socket.set_broadcast(true)?;
        if config.multicast_group.is_some() {
            socket.set_multicast_ttl_v4(config.multicast_ttl)?;
        }
        let socket = Arc::new(socket);
        self.initializations.fetch_add(1, Ordering::Relaxed);
        debug!(bind = %bind, local = ?socket.local_addr().ok(), "UDP socket opened");
        *slot = Some(Arc::clone(&socket));
        Ok(socket)
    }

    /// Destinations for one send, deduplicated in first-seen order
    pub fn collect_targets(config: &UdpConfig, target: &TargetConfig) -> Vec<UdpTarget> {
        let port = target.port.map(u32::from).unwrap_or(config.port);
        let mut out = Vec::new();

        if let Some(host) = &target.host {
            out.push(UdpTarget {
                host: host.clone(),
                port,
            });
        }
        out.extend(target.targets.iter().cloned());
        out.extend(config.targets.iter().cloned());
        if target.broadcast || config.broadcast {
            out.push(UdpTarget {
                host: config.broadcast_address.clone(),
                port,
            });
        }
        if let Some(group) = &config.multicast_group {
            out.push(UdpTarget {
                host: group.clone(),
                port,
            });
        }
        if let Some(host) = &config.host {
            out.push(UdpTarget {
                host: host.clone(),
                port: config.port,
            });
        }

        let mut seen = HashSet::new();
        out.retain(|t| seen.insert(t.authority()));
        out
    }

    async fn send_to(socket: &UdpSocket, target: &UdpTarget, data: &[u8]) -> TargetOutcome {
        let authority = target.authority();
        let result = async {
            let local_v4 = socket.local_addr().map(|a| a.is_ipv4()).unwrap_or(true);
            let addr = tokio::net::lookup_host(&authority)
                .await
                .map_err(|e| format!("resolve failed: {e}"))?
                .find(|a| a.is_ipv4() == local_v4)
                .ok_or_else(|| "no address of a usable family".to_string())?;
            socket
                .send_to(data, addr)
                .await
                .map_err(|e| format!("send failed: {e}"))
        }
        .await;
        TargetOutcome {
            target: authority,
            result,
        }
    }

    fn finish(&self, result: AdapterResult, bytes: u64) -> AdapterResult {
        self.stats
            .record_send(result.success, result.timing.duration, bytes);
        observe(PROTOCOL, &result, bytes);
        result
    }
}

#[async_trait]
impl ProtocolAdapter for UdpAdapter {
    fn protocol(&self) -> &str {
        PROTOCOL
    }

    fn capabilities(&self) -> Vec<String> {
        vec![
            "datagram".into(),
            "broadcast".into(),
            "multicast".into(),
            "fire-and-forget".into(),
        ]
    }

    #[instrument(name = "udp_send", skip_all, fields(event = ?target.event))]
    async fn send(&self, payload: &Payload, target: &TargetConfig) -> AdapterResult {
        let guard = Timing::start();
        let config = self.config();
        let data = payload.to_bytes();

        if data.len() > config.max_payload_size {
            warn!(
                size = data.len(),
                max = config.max_payload_size,
                "UDP payload above the configured limit, sending anyway"
            );
        }

        let targets = Self::collect_targets(&config, target);
        if targets.is_empty() {
            let result = AdapterResult::failed(
                PROTOCOL,
                ErrorCode::NoTargets,
                "no UDP targets resolved",
                guard.finish(),
            );
            return self.finish(result, 0);
        }

        let socket = match self.socket().await {
            Ok(socket) => socket,
            Err(e) => {
                warn!(error = %e, "UDP socket could not be opened");
                let result = AdapterResult::failed(
                    PROTOCOL,
                    ErrorCode::NetworkError,
                    format!("socket error: {e}"),
                    guard.finish(),
                );
                return self.finish(result, 0);
            }
        };

        let outcomes = join_all(
            targets
                .iter()
                .map(|t| Self::send_to(&socket, t, &data)),
        )
        .await;

        let succeeded = outcomes.iter().filter(|o| o.result.is_ok()).count();
        let failed = outcomes.len() - succeeded;
        let bytes: u64 = outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok())
            .map(|b| *b as u64)
            .sum();
        for outcome in &outcomes {
            if let Err(error) = &outcome.result {
                debug!(target = %outcome.target, error = %error, "UDP target failed");
            }
        }

        let detail = json!({
            "totalTargets": outcomes.len(),
            "successfulSends": succeeded,
            "failedSends": failed,
            "payloadSize": data.len(),
            "results": outcomes.iter().map(TargetOutcome::to_json).collect::<Vec<_>>(),
        });
        let timing = guard.finish();
        let result = if succeeded > 0 {
            AdapterResult::ok(PROTOCOL, detail, timing)
        } else {
            AdapterResult::failed(
                PROTOCOL,
                ErrorCode::SendFailed,
                format!("all {failed} UDP targets failed"),
                timing,
            )
            .with_data(detail)
        };
        self.finish(result, bytes)
    }

    async fn health_check(&self) -> bool {
        self.socket.lock().await.is_some()
    }

    fn configure(&self, partial: &Value) -> Result<(), ContractError> {
        let mut slot = self.config.write();
        let next = merge_settings(DistributorKind::Udp, &**slot, partial)?;
        let reopen = next.socket_params() != slot.socket_params();
        *slot = Arc::new(next);
        drop(slot);

        if reopen {
            // Closed now if idle, otherwise rebuilt by the next socket() call
            self.socket_dirty.store(true, Ordering::Release);
            if let Ok(mut socket) = self.socket.try_lock() {
                if socket.take().is_some() {
                    self.socket_dirty.store(false, Ordering::Release);
                }
            }
        }
        Ok(())
    }

    fn stats(&self) -> DistributorStats {
        DistributorStats::clone(&self.stats.snapshot())
    }

    async fn shutdown(&self) {
        *self.socket.lock().await = None;
    }
}
