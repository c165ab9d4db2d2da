//! Publisher error types

use contracts::{ContractError, Intent};
use thiserror::Error;

/// Errors from a single publish
#[derive(Debug, Error)]
pub enum PublishError {
    /// Only `newest` and `replay` are ever published outward
    #[error("invalid miner push intent '{intent}'")]
    UnsupportedIntent { intent: Intent },

    /// Replay topics are addressed to a requesting client
    #[error("replay publish requires a requesting client")]
    MissingRequester,

    /// Payload serialization failed
    #[error("encode error: {0}")]
    Encode(#[source] ContractError),

    /// Transport did not acknowledge the publish
    #[error("publish to '{topic}' failed: {source}")]
    Transport {
        topic: String,
        #[source]
        source: ContractError,
    },
}

/// Errors from publishing one database during a newest tick
#[derive(Debug, Error)]
pub enum TickError {
    /// Most recent block could not be read
    #[error("fetch newest block failed: {0}")]
    ChainRead(#[source] ContractError),

    /// A publish failed; transactions after it were not sent
    #[error("publish failed after {published} transactions: {source}")]
    Publish {
        published: usize,
        #[source]
        source: PublishError,
    },
}
