//! TargetConfig - per-send destination descriptor

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::HttpMethod;

/// Destination hints supplied with a payload.
///
/// Every field is optional; each adapter reads the ones that make sense
/// for its wire and ignores the rest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// Logical event / channel name
    pub event: Option<String>,
    /// SSE channel membership filter
    pub channels: Vec<String>,
    /// Restrict delivery to these connected clients
    pub client_ids: Vec<String>,

    // ===== HTTP =====
    /// Endpoint path or absolute URL
    pub endpoint: Option<String>,
    /// Request method override
    pub method: Option<HttpMethod>,
    /// Extra request headers
    pub headers: BTreeMap<String, String>,
    /// Request deadline override (milliseconds)
    pub timeout_ms: Option<u64>,

    // ===== UDP =====
    /// Single explicit host
    pub host: Option<String>,
    /// Port for `host` (and broadcast/multicast when set)
    pub port: Option<u16>,
    /// Explicit target list
    pub targets: Vec<UdpTarget>,
    /// Also send to the broadcast address
    pub broadcast: bool,

    // ===== SSE =====
    /// Explicit event id
    pub id: Option<String>,
    /// Reconnect hint in milliseconds
    pub retry_ms: Option<u64>,
}

impl TargetConfig {
    /// Target carrying only an event name
    pub fn event(name: impl Into<String>) -> Self {
        Self {
            event: Some(name.into()),
            ..Default::default()
        }
    }
}

/// host:port pair for datagram delivery
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Validate)]
pub struct UdpTarget {
    #[validate(length(min = 1))]
    pub host: String,
    #[validate(range(min = 1, max = 65535))]
    pub port: u32,
}

impl UdpTarget {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port: u32::from(port),
        }
    }

    /// `host:port` form accepted by the resolver
    pub fn authority(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}
