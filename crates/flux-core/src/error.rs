//! Core error types for flux-core.
//!
//! Uses `thiserror` for structured, matchable error variants covering the
//! failure modes of graph editing. Every rejection is local to the operation
//! that produced it: when an operation returns an error, the graph is left
//! exactly as it was before the call.

use crate::id::{BlockId, ConnectionId, NodeId, PortId};
use crate::type_id::TypeId;
use thiserror::Error;

/// Core errors produced by the flux-core crate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// A node ID was not found in the graph.
    #[error("node not found: NodeId({id})", id = id.0)]
    NodeNotFound { id: NodeId },

    /// A port ID was not found in the graph.
    #[error("port not found: PortId({id})", id = id.0)]
    PortNotFound { id: PortId },

    /// A block ID was not found in the graph.
    #[error("block not found: BlockId({id})", id = id.0)]
    BlockNotFound { id: BlockId },

    /// A connection ID was not found in the graph.
    #[error("connection not found: ConnectionId({id})", id = id.0)]
    ConnectionNotFound { id: ConnectionId },

    /// A TypeId was not found in the type registry.
    #[error("type not found: TypeId({id})", id = id.0)]
    TypeNotFound { id: TypeId },

    /// The source type is not assignable to the destination port's type.
    #[error("type mismatch: {source_type} is not assignable to {destination_type}")]
    TypeMismatch {
        source_type: String,
        destination_type: String,
    },

    /// The connection would close a cycle through data or sequence edges.
    #[error("connection from node {source_node} to node {destination_node} would create a cycle")]
    CycleRejected {
        source_node: NodeId,
        destination_node: NodeId,
    },

    /// The two ports cannot be joined (direction, sequence-ness, node rule).
    #[error("invalid connection: {reason}")]
    InvalidConnection { reason: String },

    /// A node was asked to bind a type or mode it cannot represent.
    #[error("unsupported binding: {reason}")]
    UnsupportedBinding { reason: String },

    /// Literal text failed validation for the literal's kind.
    #[error("invalid literal text: '{text}'")]
    InvalidLiteral { text: String },

    /// A name could not be resolved through the resolution context.
    #[error("unresolved symbol: {name}")]
    UnresolvedSymbol { name: String },

    /// An arena invariant was violated.
    #[error("graph inconsistency: {reason}")]
    GraphInconsistency { reason: String },
}
