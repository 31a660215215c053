//! Periodic UDP service announcement

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use contracts::{now_millis, ContractError, DiscoveryConfig, DistributorConfig, SessionConfig};
use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const ANNOUNCEMENT_TYPE: &str = "fanout-announcement";
pub const SERVICE_NAME: &str = "fanout";

/// Beacon body, one JSON object per datagram
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Announcement {
    #[serde(rename = "type")]
    pub kind: String,
    pub service: String,
    pub version: String,
    pub session: String,
    /// Distributor name -> listening or destination port
    pub protocols: BTreeMap<String, u32>,
    pub capabilities: Vec<String>,
    pub timestamp: i64,
}

impl Announcement {
    /// Describe the enabled distributors of `session`
    pub fn from_session(session: &SessionConfig, capabilities: Vec<String>) -> Self {
        let protocols = session
            .enabled_names()
            .into_iter()
            .filter_map(|name| {
                let port = match session.distributor(&name).ok()?? {
                    DistributorConfig::WebSocket(c) => c.port,
                    DistributorConfig::Sse(c) => c.port,
                    DistributorConfig::Udp(c) => c.port,
                    DistributorConfig::Http(_) | DistributorConfig::Mqtt(_) => return None,
                };
                Some((name, port))
            })
            .collect();
        Self {
            kind: ANNOUNCEMENT_TYPE.to_string(),
            service: SERVICE_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            session: session.session_id.clone(),
            protocols,
            capabilities,
            timestamp: now_millis(),
        }
    }
}

/// Sends the announcement to `address:port` every `interval_ms`
pub struct DiscoveryAnnouncer {
    config: DiscoveryConfig,
    announcement: Announcement,
    socket: UdpSocket,
}

impl DiscoveryAnnouncer {
    /// Open a broadcast-capable socket on an ephemeral port
    ///
    /// # Errors
    /// - `address` is not an IPv4 address
    /// - the socket cannot be opened
    pub async fn bind(
        config: DiscoveryConfig,
        announcement: Announcement,
    ) -> Result<Self, ContractError> {
        if config.address.parse::<std::net::Ipv4Addr>().is_err() {
            return Err(ContractError::config_validation(
                "discovery.address",
                format!("'{}' is not an IPv4 address", config.address),
            ));
        }
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|e| ContractError::bind("discovery", "0.0.0.0:0", e.to_string()))?;
        socket.set_broadcast(true)?;
        Ok(Self {
            config,
            announcement,
            socket,
        })
    }

    pub fn destination(&self) -> String {
        format!("{}:{}", self.config.address, self.config.port)
    }

    /// Send one beacon with a fresh timestamp
    pub async fn announce_once(&self) -> std::io::Result<usize> {
        let mut announcement = self.announcement.clone();
        announcement.timestamp = now_millis();
        let body = serde_json::to_vec(&announcement)?;
        self.socket.send_to(&body, self.destination()).await
    }

    /// Announce immediately, then on every interval until `cancel` fires.
    ///
    /// Send failures are logged and never stop the loop.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = time::interval(Duration::from_millis(self.config.interval_ms));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(
                destination = %self.destination(),
                interval_ms = self.config.interval_ms,
                "discovery announcer started"
            );
            loop {
                tokio::select! {
                    _ = ticker.tick() => match self.announce_once().await {
                        Ok(bytes) => debug!(bytes, "discovery announcement sent"),
                        Err(e) => warn!(error = %e, "discovery announcement failed"),
                    },
                    () = cancel.cancelled() => break,
                }
            }
            debug!("discovery announcer stopped");
        })
    }
}
