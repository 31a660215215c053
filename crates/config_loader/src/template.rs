//! Named configuration templates
//!
//! Built-ins:
//! - `default`: HTTP webhook + WebSocket + SSE
//! - `realtime`: WebSocket + SSE + UDP with short heartbeats and eye/face routes
//! - `legacy`: WebSocket 8080 + UDP broadcast 4242 + discovery 8083
//!
//! Environment overrides are read once, when the registry is built.

use std::collections::{BTreeMap, HashMap};

use contracts::ContractError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

pub const ENV_HTTP_BASE_URL: &str = "FANOUT_HTTP_BASE_URL";
pub const ENV_HTTP_ENDPOINT: &str = "FANOUT_HTTP_ENDPOINT";
pub const ENV_WS_HOST: &str = "FANOUT_WS_HOST";
pub const ENV_WS_PORT: &str = "FANOUT_WS_PORT";
pub const ENV_SSE_PORT: &str = "FANOUT_SSE_PORT";
pub const ENV_UDP_HOST: &str = "FANOUT_UDP_HOST";
pub const ENV_UDP_PORT: &str = "FANOUT_UDP_PORT";
pub const ENV_MQTT_BROKER: &str = "FANOUT_MQTT_BROKER";

/// Source of environment variables
pub trait EnvSource {
    fn var(&self, key: &str) -> Option<String>;
}

/// Reads the process environment
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|v| !v.is_empty())
    }
}

/// Fixed variable map, mostly for tests
#[derive(Debug, Clone, Default)]
pub struct MapEnv(pub HashMap<String, String>);

impl MapEnv {
    pub fn new<K, V>(vars: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self(
            vars.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl EnvSource for MapEnv {
    fn var(&self, key: &str) -> Option<String> {
        self.0.get(key).cloned()
    }
}

/// Named bundle of distributor fragments and routes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigTemplate {
    pub name: String,
    pub description: String,
    pub distributors: BTreeMap<String, Value>,
    #[serde(default)]
    pub event_routing: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled_distributors: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discovery: Option<Value>,
}

impl ConfigTemplate {
    /// Session-shaped value tree, used as the lowest merge layer
    pub fn to_session_value(&self) -> Value {
        let mut root = Map::new();
        root.insert(
            "distributors".into(),
            Value::Object(self.distributors.clone().into_iter().collect()),
        );
        root.insert("event_routing".into(), json!(self.event_routing));
        if let Some(enabled) = &self.enabled_distributors {
            root.insert("enabled_distributors".into(), json!(enabled));
        }
        if let Some(discovery) = &self.discovery {
            root.insert("discovery".into(), discovery.clone());
        }
        Value::Object(root)
    }
}

/// Extensible name -> template registry
#[derive(Debug, Clone, Default)]
pub struct TemplateRegistry {
    templates: BTreeMap<String, ConfigTemplate>,
}

impl TemplateRegistry {
    /// Empty registry
    pub fn empty() -> Self {
        Self::default()
    }

    /// Built-in templates resolved against `env`
    pub fn builtin(env: &dyn EnvSource) -> Self {
        let resolved = ResolvedEnv::read(env);
        let mut registry = Self::empty();
        registry.register(default_template(&resolved));
        registry.register(realtime_template(&resolved));
        registry.register(legacy_template(&resolved));
        registry
    }

    /// Add or replace a template
    pub fn register(&mut self, template: ConfigTemplate) {
        self.templates.insert(template.name.clone(), template);
    }

    pub fn get(&self, name: &str) -> Result<&ConfigTemplate, ContractError> {
        self.templates
            .get(name)
            .ok_or_else(|| ContractError::UnknownTemplate {
                name: name.to_string(),
                available: self.names(),
            })
    }

    pub fn names(&self) -> Vec<String> {
        self.templates.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConfigTemplate> {
        self.templates.values()
    }
}

/// Environment values picked up at registry construction
#[derive(Debug, Clone)]
struct ResolvedEnv {
    http_base_url: Value,
    http_endpoint: Value,
    ws_host: Value,
    ws_port: Value,
    sse_port: Value,
    udp_host: Value,
    udp_port: Value,
    mqtt_broker: Option<Value>,
}

impl ResolvedEnv {
    fn read(env: &dyn EnvSource) -> Self {
        let text = |key: &str, default: &str| json!(env.var(key).unwrap_or_else(|| default.into()));
        Self {
            http_base_url: text(ENV_HTTP_BASE_URL, "http://localhost:3000"),
            http_endpoint: text(ENV_HTTP_ENDPOINT, "/api/distribute"),
            ws_host: text(ENV_WS_HOST, "0.0.0.0"),
            ws_port: port(env, ENV_WS_PORT, 8080),
            sse_port: port(env, ENV_SSE_PORT, 8081),
            udp_host: text(ENV_UDP_HOST, "127.0.0.1"),
            udp_port: port(env, ENV_UDP_PORT, 4242),
            mqtt_broker: env.var(ENV_MQTT_BROKER).map(Value::String),
        }
    }
}

// Non-numeric values are kept as strings so validation reports them.
fn port(env: &dyn EnvSource, key: &str, default: u32) -> Value {
    match env.var(key) {
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Value::from)
            .unwrap_or(Value::String(raw)),
        None => json!(default),
    }
}

fn routes(entries: &[(&str, &[&str])]) -> BTreeMap<String, Vec<String>> {
    entries
        .iter()
        .map(|(event, names)| {
            (
                event.to_string(),
                names.iter().map(|n| n.to_string()).collect(),
            )
        })
        .collect()
}

fn default_template(env: &ResolvedEnv) -> ConfigTemplate {
    let mut distributors = BTreeMap::from([
        (
            "http".to_string(),
            json!({
                "base_url": env.http_base_url,
                "endpoint": env.http_endpoint,
                "method": "POST",
                "timeout_ms": 5000,
            }),
        ),
        (
            "websocket".to_string(),
            json!({
                "host": env.ws_host,
                "port": env.ws_port,
                "path": "/ws",
                "heartbeat_interval_ms": 30000,
            }),
        ),
        (
            "sse".to_string(),
            json!({
                "host": env.ws_host,
                "port": env.sse_port,
                "path": "/events",
                "heartbeat_interval_ms": 30000,
                "retry_ms": 3000,
            }),
        ),
    ]);
    if let Some(broker) = &env.mqtt_broker {
        distributors.insert(
            "mqtt".to_string(),
            json!({"broker_url": broker, "topic_prefix": "fanout", "qos": 1}),
        );
    }
    ConfigTemplate {
        name: "default".into(),
        description: "HTTP webhook, WebSocket and SSE for every event".into(),
        distributors,
        event_routing: BTreeMap::new(),
        enabled_distributors: None,
        discovery: None,
    }
}

fn realtime_template(env: &ResolvedEnv) -> ConfigTemplate {
    ConfigTemplate {
        name: "realtime".into(),
        description: "Low-latency streaming with short heartbeats; eye data also over UDP".into(),
        distributors: BTreeMap::from([
            (
                "websocket".to_string(),
                json!({
                    "host": env.ws_host,
                    "port": env.ws_port,
                    "path": "/ws",
                    "heartbeat_interval_ms": 10000,
                }),
            ),
            (
                "sse".to_string(),
                json!({
                    "host": env.ws_host,
                    "port": env.sse_port,
                    "path": "/events",
                    "heartbeat_interval_ms": 10000,
                    "retry_ms": 1000,
                }),
            ),
            (
                "udp".to_string(),
                json!({"host": env.udp_host, "port": env.udp_port}),
            ),
        ]),
        event_routing: routes(&[
            ("eye.*", &["websocket", "udp"]),
            ("face.*", &["websocket", "sse"]),
            ("*", &["websocket"]),
        ]),
        enabled_distributors: None,
        discovery: None,
    }
}

fn legacy_template(env: &ResolvedEnv) -> ConfigTemplate {
    ConfigTemplate {
        name: "legacy".into(),
        description: "Bridge-compatible WebSocket 8080, UDP broadcast 4242, discovery 8083".into(),
        distributors: BTreeMap::from([
            (
                "websocket".to_string(),
                json!({
                    "host": env.ws_host,
                    "port": env.ws_port,
                    "path": "/",
                    "heartbeat_interval_ms": 30000,
                }),
            ),
            (
                "udp".to_string(),
                json!({
                    "port": env.udp_port,
                    "broadcast": true,
                    "broadcast_address": "255.255.255.255",
                }),
            ),
        ]),
        event_routing: BTreeMap::new(),
        enabled_distributors: Some(vec!["websocket".into(), "udp".into()]),
        discovery: Some(json!({"enabled": true, "port": 8083})),
    }
}
