//! Chain collaborator contracts
//!
//! The chain subsystem orders and commits requests into blocks; the broker
//! only appends requests and reads committed blocks back.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ContractError, DatabaseId, NodeId, Statement};

/// Block position meaning "most recently committed block"
pub const LATEST_BLOCK: i32 = -1;

/// Connection identifier used for broker-originated requests
pub const BROKER_CONNECTION_ID: u64 = 0;

/// Query kind carried in a request header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    Read,
    Write,
}

/// Request header
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestHeader {
    pub query_kind: QueryKind,

    /// Requesting node
    pub node_id: NodeId,

    /// Target database
    pub database_id: DatabaseId,

    pub connection_id: u64,

    /// Client sequence number, the ordering token of the request
    pub seq_no: u64,

    pub timestamp: DateTime<Utc>,
}

/// Chain-append request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainRequest {
    pub header: RequestHeader,
    pub statements: Vec<Statement>,
}

impl ChainRequest {
    /// Write request originated by the broker on behalf of `node_id`
    pub fn write(
        node_id: NodeId,
        database_id: DatabaseId,
        seq_no: u64,
        statements: Vec<Statement>,
    ) -> Self {
        Self {
            header: RequestHeader {
                query_kind: QueryKind::Write,
                node_id,
                database_id,
                connection_id: BROKER_CONNECTION_ID,
                seq_no,
                timestamp: Utc::now(),
            },
            statements,
        }
    }
}

/// Committed transaction (immutable)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainTransaction {
    pub request: ChainRequest,
}

/// Ordered batch of committed transactions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub transactions: Vec<ChainTransaction>,
}

/// Result of a positional block fetch
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedBlock {
    pub block: Block,

    /// Resolved block count (the position actually served)
    pub count: i32,

    /// More blocks exist after this one
    pub has_more: bool,
}

/// Result of executing a request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecuteOutcome {
    pub affected_rows: i64,
    pub last_insert_id: i64,
}

/// Handle to one registered database
#[trait_variant::make(ChainDatabase: Send)]
pub trait LocalChainDatabase {
    /// Database identifier
    fn database_id(&self) -> &DatabaseId;

    /// Submit a request to the query executor
    ///
    /// # Errors
    /// Returns `ContractError::ChainExecute` when the chain rejects the request
    async fn execute(&self, request: ChainRequest) -> Result<ExecuteOutcome, ContractError>;

    /// Fetch the block at `position` (`LATEST_BLOCK` for the tip)
    ///
    /// # Errors
    /// Returns `ContractError::ChainRead` when the block cannot be served
    async fn fetch_block_at(&self, position: i32) -> Result<FetchedBlock, ContractError>;
}

/// Registry of active databases
///
/// Membership is owned by the chain subsystem; the broker only reads.
pub trait DatabaseRegistry: Send + Sync {
    type Database: ChainDatabase + Send + Sync + 'static;

    /// Look up a database by id
    fn lookup(&self, id: &DatabaseId) -> Option<Arc<Self::Database>>;

    /// Visit registered databases until `f` returns false
    fn for_each(&self, f: &mut dyn FnMut(&DatabaseId, &Arc<Self::Database>) -> bool);

    /// Collect every registered database so callers can iterate explicitly
    fn snapshot(&self) -> Vec<(DatabaseId, Arc<Self::Database>)> {
        let mut entries = Vec::new();
        self.for_each(&mut |id, db| {
            entries.push((id.clone(), Arc::clone(db)));
            true
        });
        entries
    }
}
