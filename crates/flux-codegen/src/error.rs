//! Writer error types.

/// Errors that can occur while emitting a function.
#[derive(Debug, thiserror::Error)]
pub enum CodegenError {
    /// Graph structure issue preventing emission.
    #[error("invalid graph: {0}")]
    InvalidGraph(String),

    /// A declaration needs a type that is still unresolved.
    #[error("unresolved type: {0}")]
    UnresolvedType(String),

    /// The structural form could not be encoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
