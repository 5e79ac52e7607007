//! Host block inputs
//!
//! These are the shapes the consensus host hands to the indexer once per
//! block. They carry only what indexing needs: raw transaction bytes, the
//! execution results with their events, and the flat change-set of raw
//! key/value mutations applied by the block.

use serde::{Deserialize, Serialize};

/// Block height
pub type Height = u64;

/// A single key/value attribute on an emitted event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventAttribute {
    /// Attribute key
    pub key: String,
    /// Attribute value
    pub value: String,
}

/// An event emitted during block or transaction execution
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Event {
    /// Event type (e.g. "transfer")
    pub kind: String,
    /// Ordered attributes
    pub attributes: Vec<EventAttribute>,
}

impl Event {
    /// Create an event with no attributes
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            attributes: Vec::new(),
        }
    }

    /// Builder-style attribute append
    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push(EventAttribute {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    /// First value for an attribute key
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.key == key)
            .map(|a| a.value.as_str())
    }
}

/// Per-block request from the host
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BlockRequest {
    /// Block height
    pub height: Height,
    /// Block timestamp in Unix milliseconds
    pub time_ms: u64,
    /// Proposer address, already encoded by the host
    pub proposer: String,
    /// Raw transaction bytes in block order
    pub txs: Vec<Vec<u8>>,
}

/// Execution result of one transaction
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TxResult {
    /// Result code (0 = success)
    pub code: u32,
    /// Gas requested
    pub gas_wanted: u64,
    /// Gas consumed
    pub gas_used: u64,
    /// Free-form log
    pub log: String,
    /// Events emitted by the transaction
    pub events: Vec<Event>,
}

impl TxResult {
    /// True if the transaction executed successfully
    pub fn is_ok(&self) -> bool {
        self.code == 0
    }
}

/// Per-block response from the host
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BlockResponse {
    /// One result per transaction, same order as `BlockRequest::txs`
    pub tx_results: Vec<TxResult>,
    /// Block-level events (begin/end block)
    pub events: Vec<Event>,
}

/// Commit response from the host
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CommitResponse {
    /// Host's own retain height hint (informational)
    pub retain_height: Height,
    /// Application hash after the block
    pub app_hash: Vec<u8>,
}

/// One raw mutation from the block's change-set
///
/// `value == None` is a delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvChange {
    /// Name of the host store the mutation belongs to
    pub store: String,
    /// Raw key
    pub key: Vec<u8>,
    /// New value, or `None` for a delete
    pub value: Option<Vec<u8>>,
}

impl KvChange {
    /// A set mutation
    pub fn set(store: impl Into<String>, key: Vec<u8>, value: Vec<u8>) -> Self {
        Self {
            store: store.into(),
            key,
            value: Some(value),
        }
    }

    /// A delete mutation
    pub fn delete(store: impl Into<String>, key: Vec<u8>) -> Self {
        Self {
            store: store.into(),
            key,
            value: None,
        }
    }

    /// True if this mutation deletes the key
    pub fn is_delete(&self) -> bool {
        self.value.is_none()
    }
}
