//! Diagnostics reported by [`validate_graph`](crate::validate_graph).

use flux_core::id::{BlockId, ConnectionId, NodeId, PortId};
use serde::{Deserialize, Serialize};

/// One invariant violation found in a function graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum GraphDiagnostic {
    /// Arena back references disagree.
    #[error("inconsistent graph: {reason}")]
    Integrity { reason: String },

    /// Non-feedback edges form a cycle through these nodes.
    #[error("cycle through nodes {nodes:?}")]
    Cycle { nodes: Vec<NodeId> },

    /// A connection is not stored in the lowest common block of its ends.
    #[error("connection {connection} lives in block {actual}, expected block {expected}")]
    Misplaced {
        connection: ConnectionId,
        expected: BlockId,
        actual: BlockId,
    },

    /// The source type is not assignable to the destination type.
    #[error("connection {connection}: {source_type} is not assignable to {destination_type}")]
    TypeMismatch {
        connection: ConnectionId,
        source_type: String,
        destination_type: String,
    },

    /// A sequence port is joined to a data port.
    #[error("connection {connection} joins a sequence port to a data port")]
    SequenceMismatch { connection: ConnectionId },

    /// An input holds more than one connection of the same kind.
    #[error("input port {port} holds {count} {kind} connections")]
    SlotOverflow {
        port: PortId,
        count: usize,
        kind: String,
    },

    /// A connection has an endpoint that is not bound to a port.
    #[error("connection {connection} has a dangling end")]
    Dangling { connection: ConnectionId },

    /// A break or continue outside any loop.
    #[error("branch node {node} is not inside a loop")]
    BranchOutsideLoop { node: NodeId },
}

impl GraphDiagnostic {
    /// Short tag for grouping diagnostics in reports.
    pub fn tag(&self) -> &'static str {
        match self {
            GraphDiagnostic::Integrity { .. } => "integrity",
            GraphDiagnostic::Cycle { .. } => "cycle",
            GraphDiagnostic::Misplaced { .. } => "placement",
            GraphDiagnostic::TypeMismatch { .. } => "type",
            GraphDiagnostic::SequenceMismatch { .. } => "sequence",
            GraphDiagnostic::SlotOverflow { .. } => "slot",
            GraphDiagnostic::Dangling { .. } => "dangling",
            GraphDiagnostic::BranchOutsideLoop { .. } => "branch",
        }
    }
}
