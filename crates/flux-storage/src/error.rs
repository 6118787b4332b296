//! Storage error types for flux-storage.
//!
//! A failed save leaves the stored artifacts of the function as they were;
//! callers surface the error and keep their in-memory graph.

use thiserror::Error;

use crate::types::FunctionKey;

/// Errors produced by storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Reading or writing an artifact file failed.
    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The SQLite backend reported an error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Schema migrations could not be applied.
    #[error("migration error: {0}")]
    Migration(String),

    /// No artifacts are stored under the given key.
    #[error("function not found: {0}")]
    FunctionNotFound(FunctionKey),

    /// A package path or function name cannot be mapped to a location.
    #[error("invalid key {key}: {reason}")]
    InvalidKey { key: FunctionKey, reason: String },
}
