//! Dispatcher error types

use thiserror::Error;

/// Dispatcher-specific errors
#[derive(Debug, Error)]
pub enum DispatcherError {
    /// Adapter creation error
    #[error("failed to create adapter '{name}': {message}")]
    AdapterCreation { name: String, message: String },

    /// Adapter failed to start
    #[error("adapter '{name}' failed to start: {source}")]
    AdapterStart {
        name: String,
        #[source]
        source: contracts::ContractError,
    },

    /// Contract-level error (config, bind, transport)
    #[error("contract error: {0}")]
    Contract(#[from] contracts::ContractError),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DispatcherError {
    /// Create an adapter creation error
    pub fn adapter_creation(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::AdapterCreation {
            name: name.into(),
            message: message.into(),
        }
    }
}
