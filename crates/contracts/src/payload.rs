//! BrokerPayload - wire envelope for inbound and outbound messages
//!
//! JSON object with the field names existing clients already speak:
//! `block_id`, `block_index`, `client_id`, `client_seq`, `events`,
//! `block_start`, `index_start`, `block_end`, `index_end`.

use serde::{Deserialize, Deserializer, Serialize};

use crate::{ChainTransaction, ContractError, DatabaseId, Intent, NodeId};

/// Statement argument value
///
/// Variant order is the decode order: integers that overflow `i64` land in
/// `Unsigned`, and arrays or objects fall through to `Other` unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgValue {
    Null,
    Bool(bool),
    Integer(i64),
    Unsigned(u64),
    Float(f64),
    Text(String),
    Other(serde_json::Value),
}

/// Named statement argument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedArg {
    #[serde(rename = "Name", default)]
    pub name: String,

    #[serde(rename = "Value", default = "null_arg")]
    pub value: ArgValue,
}

fn null_arg() -> ArgValue {
    ArgValue::Null
}

/// One SQL statement with its arguments
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    #[serde(rename = "Pattern", default)]
    pub pattern: String,

    #[serde(rename = "Args", default, deserialize_with = "null_as_empty")]
    pub args: Vec<NamedArg>,
}

impl Statement {
    /// Statement without arguments
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            args: Vec::new(),
        }
    }

    /// Append a named argument
    pub fn with_arg(mut self, name: impl Into<String>, value: ArgValue) -> Self {
        self.args.push(NamedArg {
            name: name.into(),
            value,
        });
        self
    }
}

/// Wire envelope
///
/// Missing keys decode as zero / empty, so a write request only needs
/// `client_seq` and `events`, and a replay request only the range fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerPayload {
    /// Committed block count, `-1` meaning most recent
    pub block_id: i32,

    /// Position of the transaction within its block
    pub block_index: i64,

    /// Requesting node of the transaction
    pub client_id: NodeId,

    /// Client-assigned monotonic write sequence number
    #[serde(rename = "client_seq")]
    pub client_sequence: u64,

    /// Ordered statements
    #[serde(deserialize_with = "null_as_empty")]
    pub events: Vec<Statement>,

    // Replay range, inclusive on both ends
    pub block_start: i32,
    pub index_start: i64,
    pub block_end: i32,
    pub index_end: i64,
}

impl BrokerPayload {
    /// Build an outbound payload from a committed transaction
    pub fn from_transaction(block_id: i32, block_index: usize, tx: &ChainTransaction) -> Self {
        let header = &tx.request.header;
        Self {
            block_id,
            block_index: block_index as i64,
            client_id: header.node_id.clone(),
            client_sequence: header.seq_no,
            events: tx.request.statements.clone(),
            ..Default::default()
        }
    }

    /// Replay range carried by this payload
    pub fn replay_range(&self) -> ReplayRange {
        ReplayRange {
            block_start: self.block_start,
            index_start: self.index_start,
            block_end: self.block_end,
            index_end: self.index_end,
        }
    }

    /// Decode from wire bytes
    pub fn decode(bytes: &[u8]) -> Result<Self, ContractError> {
        serde_json::from_slice(bytes).map_err(|e| ContractError::PayloadDecode {
            message: e.to_string(),
        })
    }

    /// Encode to wire bytes
    pub fn encode(&self) -> Result<Vec<u8>, ContractError> {
        serde_json::to_vec(self).map_err(|e| ContractError::PayloadEncode {
            message: e.to_string(),
        })
    }
}

/// Inclusive `(block, index)` range of a replay request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayRange {
    pub block_start: i32,
    pub index_start: i64,
    pub block_end: i32,
    pub index_end: i64,
}

impl ReplayRange {
    /// Start does not exceed end (lexicographic) and no block is negative
    pub fn is_well_formed(&self) -> bool {
        self.block_start >= 0
            && (self.block_start, self.index_start) <= (self.block_end, self.index_end)
    }

    /// Whether a transaction at `index` of `block` should be skipped
    /// because it precedes the start of the range
    pub fn before_start(&self, block: i32, index: i64) -> bool {
        block == self.block_start && index < self.index_start
    }

    /// Whether a transaction at `index` of `block` lies past the end of the range
    pub fn past_end(&self, block: i32, index: i64) -> bool {
        block == self.block_end && index > self.index_end
    }
}

/// One decoded inbound message
///
/// Created by the subscription callback, consumed exactly once by the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscribeEvent {
    pub client_id: NodeId,
    pub database_id: DatabaseId,
    pub intent: Intent,
    pub payload: BrokerPayload,
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}
