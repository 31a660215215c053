//! AdapterResult - the single outcome of one `send`

use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Stable failure codes surfaced to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Missing or invalid settings, detected before any I/O
    ConfigurationError,
    /// Non-2xx HTTP response
    HttpError,
    /// Request deadline exceeded
    Timeout,
    /// Connection refused, DNS failure, socket error
    NetworkError,
    /// Well-formed send with nothing to deliver to
    NoTargets,
    /// Every target of a multi-target send failed
    SendFailed,
    /// Payload could not be serialized for the wire
    SerializationError,
    /// Malformed frame from a client
    ProtocolError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConfigurationError => "CONFIGURATION_ERROR",
            Self::HttpError => "HTTP_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::NetworkError => "NETWORK_ERROR",
            Self::NoTargets => "NO_TARGETS",
            Self::SendFailed => "SEND_FAILED",
            Self::SerializationError => "SERIALIZATION_ERROR",
            Self::ProtocolError => "PROTOCOL_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wall-clock span of a send, in epoch milliseconds.
///
/// `duration == end - start` always holds; `end` is clamped so a clock
/// step backwards cannot produce a negative duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timing {
    pub start: i64,
    pub end: i64,
    pub duration: i64,
}

impl Timing {
    /// Begin timing now
    pub fn start() -> TimingGuard {
        TimingGuard {
            start: Utc::now().timestamp_millis(),
        }
    }
}

/// Started-but-unfinished timing
#[derive(Debug, Clone, Copy)]
pub struct TimingGuard {
    start: i64,
}

impl TimingGuard {
    /// Stop the clock
    pub fn finish(self) -> Timing {
        let end = Utc::now().timestamp_millis().max(self.start);
        Timing {
            start: self.start,
            end,
            duration: end - self.start,
        }
    }

    /// Start timestamp (epoch ms)
    pub fn started_at(&self) -> i64 {
        self.start
    }
}

/// Outcome of a single adapter `send`.
///
/// Produced exactly once per call and never mutated afterwards. A failed
/// result always carries both `error` and `code`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterResult {
    pub success: bool,
    pub protocol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
    pub timing: Timing,
}

impl AdapterResult {
    /// Successful send
    pub fn ok(protocol: impl Into<String>, data: Value, timing: Timing) -> Self {
        Self {
            success: true,
            protocol: protocol.into(),
            data: Some(data),
            error: None,
            code: None,
            timing,
        }
    }

    /// Failed send
    pub fn failed(
        protocol: impl Into<String>,
        code: ErrorCode,
        error: impl Into<String>,
        timing: Timing,
    ) -> Self {
        let mut error = error.into();
        if error.is_empty() {
            error = code.as_str().to_string();
        }
        Self {
            success: false,
            protocol: protocol.into(),
            data: None,
            error: Some(error),
            code: Some(code),
            timing,
        }
    }

    /// Attach diagnostic data (e.g. per-target detail) to a result
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}
