//! Error types for graph-memory

use thiserror::Error;

/// Errors that can occur in the graph memory engine
#[derive(Debug, Error)]
pub enum GraphError {
    /// RocksDB error
    #[error("Storage error: {0}")]
    Storage(#[from] rocksdb::Error),

    /// Serialization error (bincode)
    #[error("Serialization error: {0}")]
    Bincode(#[from] bincode::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// UUID parsing error
    #[error("UUID error: {0}")]
    Uuid(#[from] uuid::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// No current version exists for the requested entity or relation
    #[error("Not found: {0}")]
    NotFound(String),

    /// Input rejected before any write reached the backend
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Relation batch named entities with no current version; nothing was written
    #[error("Missing relation endpoints: {0:?}")]
    MissingEndpoints(Vec<String>),

    /// A version close targeted a row that is no longer current
    #[error("Concurrent update on {0}")]
    ConcurrentUpdate(String),

    /// A readiness or search deadline elapsed before the index answered
    #[error("Timed out waiting for {0}")]
    TimedOut(String),

    /// Embedding generation error
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Backend failure not covered by a typed conversion
    #[error("Backend error: {0}")]
    Backend(String),
}

impl GraphError {
    /// Create a not found error
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a concurrent update error
    pub fn concurrent_update(what: impl Into<String>) -> Self {
        Self::ConcurrentUpdate(what.into())
    }

    /// Create a timeout error
    pub fn timed_out(what: impl Into<String>) -> Self {
        Self::TimedOut(what.into())
    }

    /// Create an embedding error
    pub fn embedding(msg: impl Into<String>) -> Self {
        Self::Embedding(msg.into())
    }

    /// Create a backend error
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }
}

/// Result type for graph memory operations
pub type Result<T> = std::result::Result<T, GraphError>;
