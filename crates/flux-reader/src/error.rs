//! Error types for flux-reader.
//!
//! A failed read never yields a partial graph. Callers that need a graph
//! regardless use the fallback entry points in [`crate::load`], which log
//! the error and start from an empty function instead.

use flux_check::GraphDiagnostic;
use flux_core::CoreError;
use thiserror::Error;

/// Errors produced while reading a function into a graph.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReadError {
    /// The statement tree uses a construct the graph cannot represent.
    #[error("unsupported syntax: {construct}")]
    UnsupportedSyntax { construct: String },

    /// The structural form is missing, is not valid JSON, or references
    /// blocks, nodes or ports that do not exist.
    #[error("cannot load structural form: {reason}")]
    Load { reason: String },

    /// The structural form decoded, but the graph breaks an invariant.
    #[error("structural form violates {} invariant(s)", diagnostics.len())]
    Invalid { diagnostics: Vec<GraphDiagnostic> },

    /// A graph edit made while translating was rejected.
    #[error("graph edit rejected: {0}")]
    Rejected(#[from] CoreError),
}

impl ReadError {
    pub(crate) fn unsupported(construct: impl Into<String>) -> Self {
        ReadError::UnsupportedSyntax {
            construct: construct.into(),
        }
    }

    /// Whether the error came from the stored structural form rather than
    /// from a statement tree.
    pub fn is_load_failure(&self) -> bool {
        matches!(self, ReadError::Load { .. } | ReadError::Invalid { .. })
    }
}
