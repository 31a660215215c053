//! Error types for CLI operations.

use contracts::ContractError;
use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Loading, merging or validating the session failed
    #[error(transparent)]
    Config(#[from] ContractError),

    /// One or more validation errors were reported
    #[error("Configuration validation failed with {count} error(s)")]
    ValidationFailed { count: usize },
}

impl CliError {
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }
}
