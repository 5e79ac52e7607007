//! Error types for the indexer
//!
//! This module defines all error types used throughout the system.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! Not-found lookups get their own variant so callers never have to guess
//! whether an error means "absent" or "the store failed".

use std::io;
use thiserror::Error;

/// Result type alias for indexer operations
pub type IndexerResult<T> = std::result::Result<T, IndexerError>;

/// Error types for the indexing engine
#[derive(Debug, Error)]
pub enum IndexerError {
    /// I/O error (file operations, backend files)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Value serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Key bytes could not be decoded into the collection's key type
    #[error("Key codec error: {0}")]
    Codec(String),

    /// Entry not found in a collection
    #[error("Not found: {0}")]
    NotFound(String),

    /// Collection registration attempted after the schema was sealed
    #[error("Schema is sealed; cannot register collection '{0}'")]
    SchemaSealed(String),

    /// Seal called a second time
    #[error("Already sealed: {0}")]
    AlreadySealed(String),

    /// Two collections registered under the same name
    #[error("Duplicate collection name '{0}'")]
    DuplicateCollection(String),

    /// Two prefixes overlap (one is a prefix of the other)
    #[error("Prefix conflict between '{existing}' and '{new}'")]
    PrefixConflict {
        /// The already registered name
        existing: String,
        /// The name being registered
        new: String,
    },

    /// Operation not allowed in the current lifecycle state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Durable store failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Invalid or unreadable configuration
    #[error("Config error: {0}")]
    Config(String),

    /// Error raised by a submodule hook
    #[error("Submodule '{name}' failed: {message}")]
    Submodule {
        /// Submodule name
        name: String,
        /// Error message
        message: String,
    },

    /// One-shot migration failed
    #[error("Migration error: {0}")]
    Migration(String),
}

impl IndexerError {
    /// Build a storage error from any displayable cause
    pub fn storage(msg: impl Into<String>) -> Self {
        IndexerError::Storage(msg.into())
    }

    /// Build a config error
    pub fn config(msg: impl Into<String>) -> Self {
        IndexerError::Config(msg.into())
    }

    /// Build a not-found error
    pub fn not_found(what: impl Into<String>) -> Self {
        IndexerError::NotFound(what.into())
    }

    /// Build a codec error
    pub fn codec(msg: impl Into<String>) -> Self {
        IndexerError::Codec(msg.into())
    }

    /// Build an invalid-state error
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        IndexerError::InvalidState(msg.into())
    }

    /// Build a submodule error
    pub fn submodule(name: impl Into<String>, message: impl Into<String>) -> Self {
        IndexerError::Submodule {
            name: name.into(),
            message: message.into(),
        }
    }

    /// True if this is a not-found condition rather than a failure
    pub fn is_not_found(&self) -> bool {
        matches!(self, IndexerError::NotFound(_))
    }
}

impl From<bincode::Error> for IndexerError {
    fn from(e: bincode::Error) -> Self {
        IndexerError::Serialization(e.to_string())
    }
}
