//! Protocol adapter implementations
//!
//! Contains HttpAdapter, UdpAdapter, WebSocketAdapter and SseAdapter.

mod http;
mod sse;
mod udp;
mod websocket;

pub use self::http::HttpAdapter;
pub use self::sse::{SseAdapter, SseFrame};
pub use self::udp::UdpAdapter;
pub use self::websocket::WebSocketAdapter;

use std::sync::Arc;

use contracts::{
    validation_issues, ContractError, DistributorConfig, DistributorKind, ProtocolAdapter,
};
use serde_json::Value;
use tracing::instrument;

/// Build an adapter for `name` from its raw settings fragment.
///
/// # Errors
/// - Unknown name or a kind without an adapter (`mqtt`)
/// - Settings that fail to parse or validate
#[instrument(name = "create_adapter", skip(fragment))]
pub fn create_adapter(
    name: &str,
    fragment: &Value,
) -> Result<Arc<dyn ProtocolAdapter>, ContractError> {
    let kind = DistributorKind::from_name(name).ok_or_else(|| {
        ContractError::UnsupportedDistributor {
            name: name.to_string(),
        }
    })?;
    let config = DistributorConfig::parse(kind, fragment)?;
    config
        .validate_fields()
        .map_err(|errors| ContractError::ConfigInvalid {
            issues: validation_issues(name, &errors),
        })?;

    let adapter: Arc<dyn ProtocolAdapter> = match config {
        DistributorConfig::Http(c) => Arc::new(HttpAdapter::new(c)?),
        DistributorConfig::Udp(c) => Arc::new(UdpAdapter::new(c)),
        DistributorConfig::WebSocket(c) => Arc::new(WebSocketAdapter::new(c)),
        DistributorConfig::Sse(c) => Arc::new(SseAdapter::new(c)),
        DistributorConfig::Mqtt(_) => {
            return Err(ContractError::UnsupportedDistributor {
                name: name.to_string(),
            })
        }
    };
    Ok(adapter)
}

/// Compact success/failure bookkeeping shared by every adapter `send`
pub(crate) fn observe(protocol: &str, result: &contracts::AdapterResult, bytes: u64) {
    observability::record_send(
        protocol,
        result.success,
        result.timing.duration as f64,
        bytes,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_factory_builds_each_protocol() {
        for (name, fragment) in [
            ("http", json!({"base_url": "http://127.0.0.1:1"})),
            ("udp", json!({"host": "127.0.0.1"})),
            ("websocket", json!({"port": 18080})),
            ("sse", json!({"port": 18081})),
        ] {
            let adapter = create_adapter(name, &fragment).unwrap();
            assert_eq!(adapter.protocol(), name);
        }
    }

    #[test]
    fn test_factory_rejects_mqtt_and_unknown() {
        let err = create_adapter("mqtt", &json!({"broker_url": "mqtt://b"})).err().unwrap();
        assert!(matches!(err, ContractError::UnsupportedDistributor { .. }));
        let err = create_adapter("kafka", &json!({})).err().unwrap();
        assert!(matches!(err, ContractError::UnsupportedDistributor { .. }));
    }

    #[test]
    fn test_factory_validates() {
        let err = create_adapter("websocket", &json!({"port": 0})).err().unwrap();
        assert!(matches!(err, ContractError::ConfigInvalid { .. }));
    }
}
