//! Payload - opaque application data handed to adapters

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::TargetConfig;

/// Application payload as produced upstream.
///
/// Adapters never inspect the content; they only coerce it into the shape
/// their wire needs (bytes for datagrams, text for requests and frames).
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Raw binary (e.g. a legacy head-pose datagram)
    Bytes(Bytes),
    /// Pre-serialized text
    Text(String),
    /// Structured value, serialized on demand
    Json(Value),
}

impl Payload {
    /// Raw bytes: pass-through for bytes, UTF-8 for text, JSON-encoded otherwise.
    pub fn to_bytes(&self) -> Bytes {
        match self {
            Self::Bytes(b) => b.clone(),
            Self::Text(s) => Bytes::copy_from_slice(s.as_bytes()),
            Self::Json(v) => Bytes::from(v.to_string()),
        }
    }

    /// Textual form used by request bodies and stream frames.
    pub fn to_text(&self) -> String {
        match self {
            Self::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
            Self::Text(s) => s.clone(),
            Self::Json(v) => v.to_string(),
        }
    }

    /// Value form embedded inside JSON envelopes.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Bytes(b) => Value::String(String::from_utf8_lossy(b).into_owned()),
            Self::Text(s) => Value::String(s.clone()),
            Self::Json(v) => v.clone(),
        }
    }

    /// MIME type matching `to_text`/`to_bytes`.
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Bytes(_) => "application/octet-stream",
            Self::Text(_) => "text/plain; charset=utf-8",
            Self::Json(_) => "application/json",
        }
    }

    /// Serialized size in bytes.
    pub fn byte_len(&self) -> usize {
        match self {
            Self::Bytes(b) => b.len(),
            Self::Text(s) => s.len(),
            Self::Json(v) => v.to_string().len(),
        }
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(value))
    }
}

impl From<Bytes> for Payload {
    fn from(value: Bytes) -> Self {
        Self::Bytes(value)
    }
}

/// One logical send: payload, event name and optional target overrides.
///
/// Created by the caller at send time and dropped once the coordinator
/// has collected every adapter result.
#[derive(Debug, Clone, PartialEq)]
pub struct PayloadEnvelope {
    /// Logical event / channel name used for routing
    pub event: String,
    /// The data itself
    pub payload: Payload,
    /// Target applied to every selected distributor
    pub target: TargetConfig,
    /// Per-distributor targets, taking precedence over `target`
    pub overrides: BTreeMap<String, TargetConfig>,
}

impl PayloadEnvelope {
    /// Create an envelope with no target overrides
    pub fn new(event: impl Into<String>, payload: impl Into<Payload>) -> Self {
        Self {
            event: event.into(),
            payload: payload.into(),
            target: TargetConfig::default(),
            overrides: BTreeMap::new(),
        }
    }

    /// Set the shared target
    pub fn with_target(mut self, target: TargetConfig) -> Self {
        self.target = target;
        self
    }

    /// Set a target for one distributor only
    pub fn with_override(mut self, distributor: impl Into<String>, target: TargetConfig) -> Self {
        self.overrides.insert(distributor.into(), target);
        self
    }

    /// Effective target for `distributor`, with the event name filled in.
    pub fn target_for(&self, distributor: &str) -> TargetConfig {
        let mut target = self
            .overrides
            .get(distributor)
            .cloned()
            .unwrap_or_else(|| self.target.clone());
        if target.event.is_none() {
            target.event = Some(self.event.clone());
        }
        target
    }
}

/// Line-oriented wire form accepted by the CLI: `{"event", "data", "target"?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeRecord {
    pub event: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub target: TargetConfig,
    #[serde(default)]
    pub overrides: BTreeMap<String, TargetConfig>,
}

impl From<EnvelopeRecord> for PayloadEnvelope {
    fn from(record: EnvelopeRecord) -> Self {
        let payload = match record.data {
            Value::String(s) => Payload::Text(s),
            other => Payload::Json(other),
        };
        Self {
            event: record.event,
            payload,
            target: record.target,
            overrides: record.overrides,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_coercions() {
        let json = Payload::from(json!({"gaze": {"x": 0.5}}));
        assert_eq!(json.to_bytes(), Bytes::from(r#"{"gaze":{"x":0.5}}"#));
        assert_eq!(json.content_type(), "application/json");

        let text = Payload::from("hello");
        assert_eq!(text.to_bytes(), Bytes::from_static(b"hello"));
        assert_eq!(text.to_json(), json!("hello"));

        let raw = Payload::from(vec![0u8, 1, 2]);
        assert_eq!(raw.to_bytes().len(), 3);
        assert_eq!(raw.byte_len(), 3);
    }

    #[test]
    fn test_target_for_prefers_override_and_fills_event() {
        let envelope = PayloadEnvelope::new("face.detected", "x")
            .with_target(TargetConfig {
                channels: vec!["shared".into()],
                ..Default::default()
            })
            .with_override(
                "sse",
                TargetConfig {
                    channels: vec!["only-sse".into()],
                    event: Some("custom".into()),
                    ..Default::default()
                },
            );

        let ws = envelope.target_for("websocket");
        assert_eq!(ws.channels, vec!["shared".to_string()]);
        assert_eq!(ws.event.as_deref(), Some("face.detected"));

        let sse = envelope.target_for("sse");
        assert_eq!(sse.channels, vec!["only-sse".to_string()]);
        assert_eq!(sse.event.as_deref(), Some("custom"));
    }

    #[test]
    fn test_record_into_envelope() {
        let record: EnvelopeRecord =
            serde_json::from_str(r#"{"event":"eye.blink","data":{"rate":12}}"#).unwrap();
        let envelope = PayloadEnvelope::from(record);
        assert_eq!(envelope.event, "eye.blink");
        assert_eq!(envelope.payload, Payload::Json(json!({"rate": 12})));
    }
}
