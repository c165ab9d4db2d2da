//! Layered error definitions
//!
//! Categorized by source: config / payload / chain / transport

use thiserror::Error;

use crate::DatabaseId;

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

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    // ===== Payload Errors =====
    /// Wire payload could not be decoded
    #[error("payload decode error: {message}")]
    PayloadDecode { message: String },

    /// Wire payload could not be encoded
    #[error("payload encode error: {message}")]
    PayloadEncode { message: String },

    // ===== Chain Errors =====
    /// Chain rejected or failed to execute a request
    #[error("chain execute error on database '{database_id}': {message}")]
    ChainExecute {
        database_id: DatabaseId,
        message: String,
    },

    /// Chain block could not be read
    #[error("chain read error on database '{database_id}' at position {position}: {message}")]
    ChainRead {
        database_id: DatabaseId,
        position: i32,
        message: String,
    },

    // ===== Transport Errors =====
    /// Transport connection error
    #[error("transport connection error: {message}")]
    TransportConnection { message: String },

    /// Transport operation (subscribe/publish/unsubscribe) was not acknowledged
    #[error("transport {operation} failed on '{topic}': {message}")]
    TransportAck {
        operation: &'static str,
        topic: String,
        message: String,
    },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
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

    /// Create chain execute error
    pub fn chain_execute(database_id: impl Into<DatabaseId>, message: impl Into<String>) -> Self {
        Self::ChainExecute {
            database_id: database_id.into(),
            message: message.into(),
        }
    }

    /// Create chain read error
    pub fn chain_read(
        database_id: impl Into<DatabaseId>,
        position: i32,
        message: impl Into<String>,
    ) -> Self {
        Self::ChainRead {
            database_id: database_id.into(),
            position,
            message: message.into(),
        }
    }

    /// Create transport acknowledgement error
    pub fn transport_ack(
        operation: &'static str,
        topic: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::TransportAck {
            operation,
            topic: topic.into(),
            message: message.into(),
        }
    }
}
