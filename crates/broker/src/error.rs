//! Error types for broker lifecycle operations.

use contracts::ContractError;
use thiserror::Error;

/// Broker lifecycle errors
#[derive(Error, Debug)]
pub enum BrokerError {
    /// Configuration rejected before anything was started
    #[error("Configuration validation failed: {0}")]
    Config(#[source] ContractError),

    /// Transport connection failed
    #[error("Failed to connect to transport at {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: ContractError,
    },

    /// Inbound subscription was not acknowledged
    #[error("Failed to subscribe to '{filter}': {source}")]
    Subscribe {
        filter: String,
        #[source]
        source: ContractError,
    },

    /// Internal wiring failed during start
    #[error("Broker startup failed: {message}")]
    Startup { message: String },
}

/// Result type alias for broker operations
pub type Result<T> = std::result::Result<T, BrokerError>;
