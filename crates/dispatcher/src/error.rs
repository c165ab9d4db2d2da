//! Dispatcher error types

use contracts::{ContractError, DatabaseId, Intent, ReplayRange};
use publisher::PublishError;
use thiserror::Error;

/// Errors from handling one event
#[derive(Debug, Error)]
pub enum DispatcherError {
    /// Target database is not registered
    #[error("unknown database '{database_id}'")]
    UnknownDatabase { database_id: DatabaseId },

    /// Intent has no handler
    #[error("unknown intent '{intent}'")]
    UnknownIntent { intent: Intent },

    /// Replay start lies after its end, or a negative block was requested
    #[error(
        "malformed replay range ({}, {})-({}, {})",
        .range.block_start, .range.index_start, .range.block_end, .range.index_end
    )]
    MalformedRange { range: ReplayRange },

    /// Chain rejected the write request
    #[error("chain execute failed: {0}")]
    ChainExecute(#[source] ContractError),

    /// Block could not be read during replay
    #[error("chain read failed: {0}")]
    ChainRead(#[source] ContractError),

    /// Replay publish failed; the rest of the range was abandoned
    #[error("replay aborted after {published} transactions: {source}")]
    Publish {
        published: usize,
        #[source]
        source: PublishError,
    },
}

impl DispatcherError {
    /// Metric label for routing errors, `None` for collaborator failures
    pub fn drop_reason(&self) -> Option<&'static str> {
        match self {
            Self::UnknownDatabase { .. } => Some("unknown_database"),
            Self::UnknownIntent { .. } => Some("unknown_intent"),
            Self::MalformedRange { .. } => Some("malformed_range"),
            Self::ChainExecute(_) | Self::ChainRead(_) | Self::Publish { .. } => None,
        }
    }

    pub fn unknown_database(database_id: &DatabaseId) -> Self {
        Self::UnknownDatabase {
            database_id: database_id.clone(),
        }
    }
}
