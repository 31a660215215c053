//! Layered error definitions
//!
//! Categorized by source: config / adapter / transport

use serde::Serialize;
use thiserror::Error;

/// One failed check collected by fail-slow validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub field: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Unified error type
#[derive(Debug, Error)]
pub enum ContractError {
    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Single configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    /// Every issue found by a full validation pass
    #[error("config validation failed with {} issue(s): {}", issues.len(), join_issues(issues))]
    ConfigInvalid { issues: Vec<ValidationIssue> },

    /// Template lookup miss
    #[error("unknown config template '{name}' (available: {available:?})")]
    UnknownTemplate {
        name: String,
        available: Vec<String>,
    },

    // ===== Adapter Errors =====
    /// Adapter cannot be built for this distributor
    #[error("unsupported distributor '{name}'")]
    UnsupportedDistributor { name: String },

    /// Listener could not be bound
    #[error("{protocol} failed to bind {addr}: {message}")]
    Bind {
        protocol: String,
        addr: String,
        message: String,
    },

    /// Transport setup error
    #[error("{protocol} transport error: {message}")]
    Transport { protocol: String, message: String },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

fn join_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ContractError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create transport error
    pub fn transport(protocol: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            protocol: protocol.into(),
            message: message.into(),
        }
    }

    /// Create bind error
    pub fn bind(
        protocol: impl Into<String>,
        addr: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Bind {
            protocol: protocol.into(),
            addr: addr.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combined_message_lists_every_issue() {
        let err = ContractError::ConfigInvalid {
            issues: vec![
                ValidationIssue {
                    field: "http.base_url".into(),
                    message: "required".into(),
                },
                ValidationIssue {
                    field: "sse.port".into(),
                    message: "out of range".into(),
                },
            ],
        };
        let text = err.to_string();
        assert!(text.contains("2 issue(s)"), "got: {text}");
        assert!(text.contains("http.base_url: required"));
        assert!(text.contains("sse.port: out of range"));
    }
}
