//! Editing commands accepted by [`EditSession::apply`](crate::EditSession::apply).
//!
//! Each variant is one primitive edit. Commands serialize with a `type`
//! tag so a shell can send them as JSON.

use flux_core::resolve::TypeExpr;
use flux_core::{BlockId, ConnectionId, NodeId, NodeKind, Point, PortId};
use serde::{Deserialize, Serialize};

/// A single graph edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Command {
    /// Adds a node to a block, placed at `at`.
    AddNode {
        block: BlockId,
        kind: NodeKind,
        #[serde(default)]
        at: Point,
    },
    /// Removes a node with everything nested inside it and its connections.
    RemoveNode { node: NodeId },
    /// Connects two ports, in either order.
    Connect {
        from: PortId,
        to: PortId,
        #[serde(default)]
        feedback: bool,
    },
    /// Removes a connection.
    Disconnect { connection: ConnectionId },
    /// Marks or unmarks a connection as feedback.
    SetFeedback { connection: ConnectionId, feedback: bool },
    /// Binds (or, with `None`, unbinds) the type of a composite, convert,
    /// make or type-assert node.
    BindType { node: NodeId, ty: Option<TypeExpr> },
    /// Switches a value or index node between reading and writing.
    ToggleSet { node: NodeId },
    /// Adds an element input to an append or variadic call.
    AddElement { node: NodeId },
    /// Switches an append or variadic call between elements and spread.
    ToggleSpread { node: NodeId },
    /// Replaces the text of a literal.
    SetLiteralText { node: NodeId, text: String },
    /// Adds a parameter to a function or function-literal inputs node.
    AddParam {
        ports_node: NodeId,
        name: String,
        ty: TypeExpr,
    },
    /// Adds a result to a function or function-literal outputs node.
    AddResult {
        ports_node: NodeId,
        name: String,
        ty: TypeExpr,
    },
    /// Removes a parameter, result or element port.
    RemovePort { port: PortId },
    /// Moves a node. Layout only.
    SetPosition { node: NodeId, at: Point },
}

impl Command {
    /// Short tag used in logs.
    pub fn tag(&self) -> &'static str {
        match self {
            Command::AddNode { .. } => "add_node",
            Command::RemoveNode { .. } => "remove_node",
            Command::Connect { .. } => "connect",
            Command::Disconnect { .. } => "disconnect",
            Command::SetFeedback { .. } => "set_feedback",
            Command::BindType { .. } => "bind_type",
            Command::ToggleSet { .. } => "toggle_set",
            Command::AddElement { .. } => "add_element",
            Command::ToggleSpread { .. } => "toggle_spread",
            Command::SetLiteralText { .. } => "set_literal_text",
            Command::AddParam { .. } => "add_param",
            Command::AddResult { .. } => "add_result",
            Command::RemovePort { .. } => "remove_port",
            Command::SetPosition { .. } => "set_position",
        }
    }
}

/// What a successful command created, if anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Applied {
    Node(NodeId),
    Connection(ConnectionId),
    Port(PortId),
    Done,
}
