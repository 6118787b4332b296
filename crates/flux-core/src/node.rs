//! Arena records: [`Port`], [`Connection`], [`Block`] and [`Node`].
//!
//! All back references are identifiers resolved through the owning
//! [`FunctionGraph`](crate::graph::FunctionGraph).

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::id::{BlockId, ConnectionId, NodeId, PortId};
use crate::kind::NodeKind;
use crate::type_id::TypeId;

/// Layout coordinate. Never affects topology.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Point { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Input,
    Output,
}

/// A typed attachment point on a node.
#[derive(Debug, Clone, PartialEq)]
pub struct Port {
    pub node: NodeId,
    pub direction: Direction,
    pub name: String,
    /// `None` while unresolved.
    pub ty: Option<TypeId>,
    /// Attached connections in attachment order.
    pub conns: SmallVec<[ConnectionId; 2]>,
}

impl Port {
    pub fn is_output(&self) -> bool {
        self.direction == Direction::Output
    }

    pub fn is_sequence(&self) -> bool {
        self.ty == Some(TypeId::SEQUENCE)
    }
}

/// One end of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Endpoint {
    Port(PortId),
    /// Unbound, remembered at its last position.
    Dangling(Point),
}

impl Endpoint {
    pub fn port(&self) -> Option<PortId> {
        match self {
            Endpoint::Port(p) => Some(*p),
            Endpoint::Dangling(_) => None,
        }
    }
}

/// A directed edge from an output port to an input port.
#[derive(Debug, Clone, PartialEq)]
pub struct Connection {
    /// Lowest common block of the endpoint nodes' blocks.
    pub block: BlockId,
    pub source: Endpoint,
    pub destination: Endpoint,
    /// Reassignment of an existing binding; exempt from acyclicity.
    pub feedback: bool,
}

impl Connection {
    pub fn source_port(&self) -> Option<PortId> {
        self.source.port()
    }

    pub fn destination_port(&self) -> Option<PortId> {
        self.destination.port()
    }

    pub fn is_dangling(&self) -> bool {
        self.source_port().is_none() || self.destination_port().is_none()
    }
}

/// One lexical scope.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub parent: Option<BlockId>,
    /// Control-flow node whose body this is; `None` for the function block.
    pub owner: Option<NodeId>,
    pub nodes: IndexSet<NodeId>,
    pub conns: IndexSet<ConnectionId>,
}

impl Block {
    pub(crate) fn new(parent: Option<BlockId>, owner: Option<NodeId>) -> Self {
        Block {
            parent,
            owner,
            nodes: IndexSet::new(),
            conns: IndexSet::new(),
        }
    }
}

/// A unit of computation.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub block: BlockId,
    pub kind: NodeKind,
    pub inputs: Vec<PortId>,
    pub outputs: Vec<PortId>,
    /// Nested blocks: `[then, else]` for If, `[body]` for Loop and
    /// FuncLiteral.
    pub blocks: SmallVec<[BlockId; 2]>,
    /// Ports nodes inside `blocks[0]`: `[loop inputs]` for Loop,
    /// `[inputs, outputs]` for FuncLiteral.
    pub inner: SmallVec<[NodeId; 2]>,
    pub position: Point,
}

impl Node {
    pub fn seq_input(&self) -> Option<PortId> {
        if self.kind.has_seq_input() {
            self.inputs.first().copied()
        } else {
            None
        }
    }

    pub fn seq_output(&self) -> Option<PortId> {
        if self.kind.has_seq_output() {
            self.outputs.first().copied()
        } else {
            None
        }
    }

    /// Inputs excluding the sequence port.
    pub fn data_inputs(&self) -> &[PortId] {
        let skip = usize::from(self.kind.has_seq_input()).min(self.inputs.len());
        &self.inputs[skip..]
    }

    /// Outputs excluding the sequence port.
    pub fn data_outputs(&self) -> &[PortId] {
        let skip = usize::from(self.kind.has_seq_output()).min(self.outputs.len());
        &self.outputs[skip..]
    }
}

/// Notification for the editing shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GraphEvent {
    /// The node's port set, port types or binding changed.
    LayoutInvalidated(NodeId),
    /// Nodes or connections were added to or removed from the block.
    BlockChanged(BlockId),
}
