//! Distributor configuration - per-protocol settings and the session bundle
//!
//! Fragments travel as `serde_json::Value` trees so they can be layered
//! (template, overrides, `configure()` partials) before being parsed into
//! the typed structs below.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use validator::{Validate, ValidationErrors, ValidationErrorsKind};

use crate::{ContractError, UdpTarget, ValidationIssue};

/// Largest payload that fits a single IPv4 UDP datagram
pub const MAX_UDP_PAYLOAD: usize = 65_507;

/// Supported distributor kinds (distributor map keys)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistributorKind {
    Http,
    Udp,
    #[serde(rename = "websocket")]
    WebSocket,
    Sse,
    /// Validated only; no adapter ships for it
    Mqtt,
}

impl DistributorKind {
    pub const ALL: [DistributorKind; 5] = [
        Self::Http,
        Self::Udp,
        Self::WebSocket,
        Self::Sse,
        Self::Mqtt,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Udp => "udp",
            Self::WebSocket => "websocket",
            Self::Sse => "sse",
            Self::Mqtt => "mqtt",
        }
    }
}

impl fmt::Display for DistributorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// HTTP request method
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Post,
    Put,
    Patch,
}

/// Webhook-style HTTP delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct HttpConfig {
    /// Base address, `http(s)://host[:port][/prefix]`
    pub base_url: Option<String>,
    /// Path appended to `base_url`, or an absolute URL
    #[validate(length(min = 1))]
    pub endpoint: String,
    pub method: HttpMethod,
    pub headers: BTreeMap<String, String>,
    /// Hard per-request deadline
    #[validate(range(min = 1))]
    pub timeout_ms: u64,
    /// Deadline for `GET <base>/health`
    #[validate(range(min = 1))]
    pub health_timeout_ms: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            endpoint: "/".to_string(),
            method: HttpMethod::Post,
            headers: BTreeMap::new(),
            timeout_ms: 5_000,
            health_timeout_ms: 2_000,
        }
    }
}

/// Datagram delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct UdpConfig {
    /// Local address the socket binds to
    pub bind_address: String,
    /// Fixed local port; `None` binds an ephemeral one
    #[validate(range(max = 65535))]
    pub bind_port: Option<u32>,
    /// Default destination host
    pub host: Option<String>,
    /// Destination port for `host`, broadcast and multicast
    #[validate(range(min = 1, max = 65535))]
    pub port: u32,
    /// Additional fixed destinations
    #[validate(nested)]
    pub targets: Vec<UdpTarget>,
    /// Always include the broadcast address
    pub broadcast: bool,
    pub broadcast_address: String,
    /// IPv4 multicast group
    pub multicast_group: Option<String>,
    #[validate(range(min = 1, max = 255))]
    pub multicast_ttl: u32,
    /// Soft limit; larger payloads are logged and still attempted
    pub max_payload_size: usize,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            bind_port: None,
            host: None,
            port: 4242,
            targets: Vec::new(),
            broadcast: false,
            broadcast_address: "255.255.255.255".to_string(),
            multicast_group: None,
            multicast_ttl: 1,
            max_payload_size: MAX_UDP_PAYLOAD,
        }
    }
}

impl UdpConfig {
    /// True when no destination of any kind is configured
    pub fn has_no_targets(&self) -> bool {
        self.host.is_none()
            && self.targets.is_empty()
            && !self.broadcast
            && self.multicast_group.is_none()
    }

    /// Fields whose change invalidates an open socket
    pub fn socket_params(&self) -> (String, Option<u32>, bool, Option<String>, u32) {
        (
            self.bind_address.clone(),
            self.bind_port,
            self.broadcast,
            self.multicast_group.clone(),
            self.multicast_ttl,
        )
    }
}

/// Persistent bidirectional socket server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct WebSocketConfig {
    pub host: String,
    #[validate(range(min = 1, max = 65535))]
    pub port: u32,
    /// Upgrade path
    #[validate(length(min = 1))]
    pub path: String,
    #[validate(range(min = 1))]
    pub heartbeat_interval_ms: u64,
    pub max_connections: Option<usize>,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            path: "/ws".to_string(),
            heartbeat_interval_ms: 30_000,
            max_connections: None,
        }
    }
}

/// One-way event stream server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SseConfig {
    pub host: String,
    #[validate(range(min = 1, max = 65535))]
    pub port: u32,
    /// Streaming path
    #[validate(length(min = 1))]
    pub path: String,
    #[validate(range(min = 1))]
    pub heartbeat_interval_ms: u64,
    /// `retry:` hint sent to clients
    pub retry_ms: Option<u64>,
    pub max_connections: Option<usize>,
}

impl Default for SseConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8081,
            path: "/events".to_string(),
            heartbeat_interval_ms: 30_000,
            retry_ms: Some(3_000),
            max_connections: None,
        }
    }
}

/// Message-bus settings (validated, not served)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct MqttConfig {
    /// `mqtt://` or `mqtts://` broker address
    pub broker_url: String,
    pub topic_prefix: String,
    #[validate(range(max = 2))]
    pub qos: u8,
    pub client_id: Option<String>,
}

/// Periodic UDP service announcement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub enabled: bool,
    #[validate(range(min = 1, max = 65535))]
    pub port: u32,
    pub address: String,
    #[validate(range(min = 100))]
    pub interval_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 8083,
            address: "255.255.255.255".to_string(),
            interval_ms: 5_000,
        }
    }
}

/// Typed view of one distributor fragment
#[derive(Debug, Clone, PartialEq)]
pub enum DistributorConfig {
    Http(HttpConfig),
    Udp(UdpConfig),
    WebSocket(WebSocketConfig),
    Sse(SseConfig),
    Mqtt(MqttConfig),
}

impl DistributorConfig {
    /// Parse a raw fragment according to its kind
    pub fn parse(kind: DistributorKind, fragment: &Value) -> Result<Self, ContractError> {
        let parsed = match kind {
            DistributorKind::Http => Self::Http(parse_fragment(kind, fragment)?),
            DistributorKind::Udp => Self::Udp(parse_fragment(kind, fragment)?),
            DistributorKind::WebSocket => Self::WebSocket(parse_fragment(kind, fragment)?),
            DistributorKind::Sse => Self::Sse(parse_fragment(kind, fragment)?),
            DistributorKind::Mqtt => Self::Mqtt(parse_fragment(kind, fragment)?),
        };
        Ok(parsed)
    }

    pub fn kind(&self) -> DistributorKind {
        match self {
            Self::Http(_) => DistributorKind::Http,
            Self::Udp(_) => DistributorKind::Udp,
            Self::WebSocket(_) => DistributorKind::WebSocket,
            Self::Sse(_) => DistributorKind::Sse,
            Self::Mqtt(_) => DistributorKind::Mqtt,
        }
    }

    /// Run the derive-based field checks
    pub fn validate_fields(&self) -> Result<(), validator::ValidationErrors> {
        match self {
            Self::Http(c) => c.validate(),
            Self::Udp(c) => c.validate(),
            Self::WebSocket(c) => c.validate(),
            Self::Sse(c) => c.validate(),
            Self::Mqtt(c) => c.validate(),
        }
    }
}

/// Deserialize a fragment into its typed config
pub fn parse_fragment<T: DeserializeOwned>(
    kind: DistributorKind,
    fragment: &Value,
) -> Result<T, ContractError> {
    // `null` means "all defaults"
    let fragment = if fragment.is_null() {
        Value::Object(Default::default())
    } else {
        fragment.clone()
    };
    serde_json::from_value(fragment).map_err(|e| {
        ContractError::config_validation(kind.as_str(), format!("invalid settings: {e}"))
    })
}

/// Flatten derive-generated errors (nested structs and lists included)
pub fn validation_issues(prefix: &str, errors: &ValidationErrors) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    collect_issues(prefix, errors, &mut issues);
    issues.sort_by(|a, b| a.field.cmp(&b.field));
    issues
}

fn collect_issues(prefix: &str, errors: &ValidationErrors, out: &mut Vec<ValidationIssue>) {
    for (field, kind) in errors.errors() {
        let path = format!("{prefix}.{field}");
        match kind {
            ValidationErrorsKind::Field(list) => {
                for error in list {
                    let message = match (&error.message, error.params.get("value")) {
                        (Some(message), _) => message.to_string(),
                        (None, Some(value)) => format!("failed '{}' check (got {value})", error.code),
                        (None, None) => format!("failed '{}' check", error.code),
                    };
                    out.push(ValidationIssue::new(path.clone(), message));
                }
            }
            ValidationErrorsKind::Struct(inner) => collect_issues(&path, inner, out),
            ValidationErrorsKind::List(items) => {
                for (idx, inner) in items {
                    collect_issues(&format!("{path}[{idx}]"), inner, out);
                }
            }
        }
    }
}

/// Deep-merge `partial` over `current`, re-parse and re-validate.
///
/// Used by adapters' `configure()`; the caller swaps the result in only
/// on success.
pub fn merge_settings<T>(
    kind: DistributorKind,
    current: &T,
    partial: &Value,
) -> Result<T, ContractError>
where
    T: Serialize + DeserializeOwned + Validate,
{
    let base = serde_json::to_value(current).map_err(|e| {
        ContractError::config_validation(kind.as_str(), format!("cannot snapshot settings: {e}"))
    })?;
    let merged = crate::deep_merge(&base, partial);
    let next: T = parse_fragment(kind, &merged)?;
    next.validate().map_err(|errors| ContractError::ConfigInvalid {
        issues: validation_issues(kind.as_str(), &errors),
    })?;
    Ok(next)
}

/// Scheme of an absolute URL (`http`, `mqtts`, ...), lower-cased.
///
/// Returns `None` unless the input looks like `scheme://authority...`
/// with a non-empty authority.
pub fn url_scheme(url: &str) -> Option<String> {
    let (scheme, rest) = url.split_once("://")?;
    let valid_scheme = !scheme.is_empty()
        && scheme.starts_with(|c: char| c.is_ascii_alphabetic())
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    let authority = rest.split(['/', '?', '#']).next().unwrap_or("");
    if valid_scheme && !authority.is_empty() {
        Some(scheme.to_ascii_lowercase())
    } else {
        None
    }
}

/// Full configuration of one logical run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Free-form run identifier
    pub session_id: String,
    /// Distributor name (protocol) -> settings fragment
    pub distributors: BTreeMap<String, Value>,
    /// Event name or pattern -> distributor names
    pub event_routing: BTreeMap<String, Vec<String>>,
    /// Explicit allow-list; `None` enables every configured distributor
    pub enabled_distributors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discovery: Option<DiscoveryConfig>,
}

impl SessionConfig {
    /// Whether `name` is configured and allowed
    pub fn is_enabled(&self, name: &str) -> bool {
        self.distributors.contains_key(name)
            && self
                .enabled_distributors
                .as_ref()
                .is_none_or(|allowed| allowed.iter().any(|a| a == name))
    }

    /// Configured distributors that pass the allow-list, in name order
    pub fn enabled_names(&self) -> Vec<String> {
        self.distributors
            .keys()
            .filter(|name| self.is_enabled(name))
            .cloned()
            .collect()
    }

    /// Parse one distributor's fragment
    pub fn distributor(&self, name: &str) -> Result<Option<DistributorConfig>, ContractError> {
        let Some(fragment) = self.distributors.get(name) else {
            return Ok(None);
        };
        let kind = DistributorKind::from_name(name)
            .ok_or_else(|| ContractError::config_validation(name, "unknown distributor type"))?;
        DistributorConfig::parse(kind, fragment).map(Some)
    }
}
