//! Error types for flux-session.
//!
//! A rejected command leaves the graph exactly as it was before the
//! command; the session stays usable.

use flux_codegen::CodegenError;
use flux_core::CoreError;
use flux_storage::StorageError;
use thiserror::Error;

/// Errors produced by an editing session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The graph refused the edit.
    #[error("edit rejected: {0}")]
    Rejected(#[from] CoreError),

    /// The graph could not be written out.
    #[error("cannot write function: {0}")]
    Write(#[from] CodegenError),

    /// The store failed to load or save artifacts.
    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),

    /// An interactive connection is already being dragged.
    #[error("a connection is already in progress")]
    ConnectionInProgress,

    /// There is no interactive connection to drag, finish or cancel.
    #[error("no connection in progress")]
    NoConnectionInProgress,
}
