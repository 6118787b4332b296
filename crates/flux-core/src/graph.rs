//! FunctionGraph: the arena holding one function's blocks, nodes, ports and
//! connections.
//!
//! [`FunctionGraph`] is the single entry point for editing a function. Every
//! public mutation either completes and leaves the graph satisfying its
//! invariants, or returns an error and leaves the graph exactly as it was:
//!
//! 1. Data and sequence edges form no cycle; feedback edges are exempt.
//! 2. A connection lives in the lowest common block of its endpoint nodes.
//! 3. A bound connection's source type is assignable to its destination.
//! 4. No connection references a removed port.
//!
//! Node-specific reactions to connection changes live in [`crate::react`].

use std::collections::{BTreeMap, BTreeSet, HashSet};

use indexmap::{IndexMap, IndexSet};
use smallvec::SmallVec;

use crate::assign::assignable;
use crate::error::CoreError;
use crate::id::{BlockId, ConnectionId, IdCounter, NodeId, PortId};
use crate::kind::{NodeKind, PortsRole};
use crate::node::{Block, Connection, Direction, Endpoint, GraphEvent, Node, Point, Port};
use crate::type_id::{TypeId, TypeRegistry};
use crate::types::{Param, Signature};

/// Reference counts of packages other than the function's own.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageRefs(BTreeMap<String, u32>);

impl PackageRefs {
    pub fn add(&mut self, path: &str) {
        *self.0.entry(path.to_string()).or_insert(0) += 1;
    }

    pub fn sub(&mut self, path: &str) {
        if let Some(count) = self.0.get_mut(path) {
            *count -= 1;
            if *count == 0 {
                self.0.remove(path);
            }
        }
    }

    pub fn count(&self, path: &str) -> u32 {
        self.0.get(path).copied().unwrap_or(0)
    }

    /// Referenced package paths in sorted order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Which end of a connection an operation addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum End {
    Source,
    Destination,
}

/// One function's dataflow graph.
#[derive(Debug, Clone)]
pub struct FunctionGraph {
    name: String,
    package: String,
    /// The first parameter is the method receiver.
    receiver: bool,
    /// Type registry for this function
    pub types: TypeRegistry,
    pub(crate) blocks: IndexMap<BlockId, Block>,
    pub(crate) nodes: IndexMap<NodeId, Node>,
    pub(crate) ports: IndexMap<PortId, Port>,
    pub(crate) conns: IndexMap<ConnectionId, Connection>,
    root: BlockId,
    inputs_node: NodeId,
    outputs_node: NodeId,
    pub(crate) pkg_refs: PackageRefs,
    pub(crate) events: IndexSet<GraphEvent>,
    next_block: IdCounter,
    next_node: IdCounter,
    next_port: IdCounter,
    next_conn: IdCounter,
}

impl FunctionGraph {
    /// Creates an empty function: a root block holding the parameter and
    /// result ports nodes.
    pub fn new(package: &str, name: &str) -> Self {
        Self::with_types(package, name, TypeRegistry::new())
    }

    /// Like [`new`](Self::new) with a pre-populated type registry.
    pub fn with_types(package: &str, name: &str, types: TypeRegistry) -> Self {
        let mut graph = FunctionGraph {
            name: name.to_string(),
            package: package.to_string(),
            receiver: false,
            types,
            blocks: IndexMap::new(),
            nodes: IndexMap::new(),
            ports: IndexMap::new(),
            conns: IndexMap::new(),
            root: BlockId(0),
            inputs_node: NodeId(0),
            outputs_node: NodeId(0),
            pkg_refs: PackageRefs::default(),
            events: IndexSet::new(),
            next_block: IdCounter::default(),
            next_node: IdCounter::default(),
            next_port: IdCounter::default(),
            next_conn: IdCounter::default(),
        };
        graph.root = graph.alloc_block(None, None);
        graph.inputs_node = graph.alloc_node(
            graph.root,
            NodeKind::Ports {
                role: PortsRole::Inputs,
            },
        );
        graph.outputs_node = graph.alloc_node(
            graph.root,
            NodeKind::Ports {
                role: PortsRole::Outputs,
            },
        );
        graph.events.clear();
        graph
    }

    // -----------------------------------------------------------------------
    // Read-only accessors
    // -----------------------------------------------------------------------

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Import path of the function's package.
    pub fn package(&self) -> &str {
        &self.package
    }

    pub fn has_receiver(&self) -> bool {
        self.receiver
    }

    pub fn root_block(&self) -> BlockId {
        self.root
    }

    /// Ports node exposing the parameters (and receiver) as outputs.
    pub fn inputs_node(&self) -> NodeId {
        self.inputs_node
    }

    /// Ports node exposing the results as inputs.
    pub fn outputs_node(&self) -> NodeId {
        self.outputs_node
    }

    pub fn get_node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn get_port(&self, id: PortId) -> Option<&Port> {
        self.ports.get(&id)
    }

    pub fn get_block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(&id)
    }

    pub fn get_connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.conns.get(&id)
    }

    /// Nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter().map(|(id, n)| (*id, n))
    }

    pub fn ports(&self) -> impl Iterator<Item = (PortId, &Port)> {
        self.ports.iter().map(|(id, p)| (*id, p))
    }

    pub fn blocks(&self) -> impl Iterator<Item = (BlockId, &Block)> {
        self.blocks.iter().map(|(id, b)| (*id, b))
    }

    pub fn connections(&self) -> impl Iterator<Item = (ConnectionId, &Connection)> {
        self.conns.iter().map(|(id, c)| (*id, c))
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn connection_count(&self) -> usize {
        self.conns.len()
    }

    pub fn package_refs(&self) -> &PackageRefs {
        &self.pkg_refs
    }

    /// Insertion index of a node, the deterministic tie-break for ordering.
    pub fn node_index(&self, id: NodeId) -> Option<usize> {
        self.nodes.get_index_of(&id)
    }

    /// Parent of `block`, or `None` for the function block.
    pub fn outer(&self, block: BlockId) -> Option<BlockId> {
        self.blocks.get(&block).and_then(|b| b.parent)
    }

    /// Connections arriving at any input of `node`.
    pub fn incoming(&self, node: NodeId) -> Vec<ConnectionId> {
        self.attached(node, |n| &n.inputs)
    }

    /// Connections leaving any output of `node`.
    pub fn outgoing(&self, node: NodeId) -> Vec<ConnectionId> {
        self.attached(node, |n| &n.outputs)
    }

    fn attached(&self, node: NodeId, side: impl Fn(&Node) -> &Vec<PortId>) -> Vec<ConnectionId> {
        let Some(n) = self.nodes.get(&node) else {
            return Vec::new();
        };
        side(n)
            .iter()
            .filter_map(|p| self.ports.get(p))
            .flat_map(|p| p.conns.iter().copied())
            .collect()
    }

    /// The non-feedback connection feeding an input port.
    pub fn input_connection(&self, port: PortId) -> Option<ConnectionId> {
        self.ports
            .get(&port)?
            .conns
            .iter()
            .copied()
            .find(|c| self.conns.get(c).is_some_and(|c| !c.feedback))
    }

    /// Source port of the non-feedback connection feeding `port`.
    pub fn input_source(&self, port: PortId) -> Option<PortId> {
        self.input_connection(port)
            .and_then(|c| self.conns.get(&c))
            .and_then(|c| c.source_port())
    }

    /// Type of the value arriving at an input through its non-feedback
    /// connection.
    pub fn input_source_type(&self, port: PortId) -> Option<TypeId> {
        self.input_source(port)
            .and_then(|p| self.ports.get(&p))
            .and_then(|p| p.ty)
    }

    /// The function signature described by the two ports nodes. The
    /// receiver, if any, is not part of it.
    pub fn signature(&self) -> Signature {
        let skip = usize::from(self.receiver);
        let params = self.port_params(self.inputs_node, Direction::Output);
        let results = self.port_params(self.outputs_node, Direction::Input);
        Signature {
            params: params.into_iter().skip(skip).collect(),
            results,
            variadic: false,
        }
    }

    /// Receiver parameter, if the function is a method.
    pub fn receiver_param(&self) -> Option<Param> {
        if !self.receiver {
            return None;
        }
        self.port_params(self.inputs_node, Direction::Output)
            .into_iter()
            .next()
    }

    pub(crate) fn port_params(&self, node: NodeId, direction: Direction) -> Vec<Param> {
        let Some(n) = self.nodes.get(&node) else {
            return Vec::new();
        };
        let list = match direction {
            Direction::Input => &n.inputs,
            Direction::Output => &n.outputs,
        };
        list.iter()
            .filter_map(|p| self.ports.get(p))
            .map(|p| Param {
                name: p.name.clone(),
                ty: p.ty.unwrap_or(TypeId::EMPTY_INTERFACE),
            })
            .collect()
    }

    /// Returns and clears pending layout notifications.
    pub fn drain_events(&mut self) -> Vec<GraphEvent> {
        self.events.drain(..).collect()
    }

    // -----------------------------------------------------------------------
    // Block structure
    // -----------------------------------------------------------------------

    /// Nesting depth of a block; the function block has depth 0.
    pub fn depth(&self, block: BlockId) -> usize {
        let mut depth = 0;
        let mut current = block;
        while let Some(parent) = self.outer(current) {
            depth += 1;
            current = parent;
        }
        depth
    }

    /// Lowest common ancestor of two blocks.
    pub fn lca(&self, a: BlockId, b: BlockId) -> BlockId {
        let (mut a, mut b) = (a, b);
        let (mut da, mut db) = (self.depth(a), self.depth(b));
        while da > db {
            a = self.outer(a).unwrap_or(a);
            da -= 1;
        }
        while db > da {
            b = self.outer(b).unwrap_or(b);
            db -= 1;
        }
        while a != b {
            match (self.outer(a), self.outer(b)) {
                (Some(pa), Some(pb)) => {
                    a = pa;
                    b = pb;
                }
                _ => return self.root,
            }
        }
        a
    }

    /// True if `ancestor` is `block` or encloses it.
    pub fn encloses(&self, ancestor: BlockId, block: BlockId) -> bool {
        let mut current = Some(block);
        while let Some(b) = current {
            if b == ancestor {
                return true;
            }
            current = self.outer(b);
        }
        false
    }

    /// Innermost Loop node enclosing `block` within the same function
    /// literal.
    pub fn enclosing_loop(&self, block: BlockId) -> Option<NodeId> {
        let mut current = Some(block);
        while let Some(b) = current {
            let owner = self.blocks.get(&b)?.owner?;
            match self.nodes.get(&owner)?.kind {
                NodeKind::Loop => return Some(owner),
                NodeKind::FuncLiteral => return None,
                _ => current = self.outer(b),
            }
        }
        None
    }

    /// All nodes inside the nested blocks of `node`, at any depth.
    pub fn nested_nodes(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<BlockId> = self
            .nodes
            .get(&node)
            .map(|n| n.blocks.to_vec())
            .unwrap_or_default();
        while let Some(b) = stack.pop() {
            if let Some(block) = self.blocks.get(&b) {
                for n in &block.nodes {
                    out.push(*n);
                    if let Some(inner) = self.nodes.get(n) {
                        stack.extend(inner.blocks.iter().copied());
                    }
                }
            }
        }
        out
    }

    // -----------------------------------------------------------------------
    // Precedence
    // -----------------------------------------------------------------------

    /// Lifts `a` and `b` through their enclosing control-flow nodes until
    /// both sit in the same block.
    fn normalize(&self, a: NodeId, b: NodeId) -> (NodeId, NodeId) {
        let block_of = |n: NodeId| self.nodes.get(&n).map(|n| n.block);
        let owner_of = |b: BlockId| self.blocks.get(&b).and_then(|b| b.owner);
        let mut n1 = a;
        while let Some(b1) = block_of(n1) {
            let mut n2 = b;
            while let Some(b2) = block_of(n2) {
                if b1 == b2 {
                    return (n1, n2);
                }
                match owner_of(b2) {
                    Some(owner) => n2 = owner,
                    None => break,
                }
            }
            match owner_of(b1) {
                Some(owner) => n1 = owner,
                None => break,
            }
        }
        (a, b)
    }

    /// True if `end` is reachable from `start` over non-feedback edges,
    /// after normalizing both to a common block. The search continues
    /// towards the normalized end, so reaching any node nested inside it
    /// counts. A node precedes itself.
    pub fn precedes(&self, start: NodeId, end: NodeId) -> bool {
        let mut visited = HashSet::new();
        self.precedes_from(start, end, &mut visited)
    }

    fn precedes_from(
        &self,
        start: NodeId,
        end: NodeId,
        visited: &mut HashSet<(NodeId, NodeId)>,
    ) -> bool {
        let (s, e) = self.normalize(start, end);
        if s == e {
            return true;
        }
        if !visited.insert((s, e)) {
            return false;
        }
        self.downstream(s)
            .into_iter()
            .any(|next| self.precedes_from(next, e, visited))
    }

    /// Destination nodes of non-feedback edges leaving `node` or any node
    /// nested inside it.
    fn downstream(&self, node: NodeId) -> Vec<NodeId> {
        let mut sources = vec![node];
        sources.extend(self.nested_nodes(node));
        let mut out = Vec::new();
        for n in sources {
            for c in self.outgoing(n) {
                let Some(conn) = self.conns.get(&c) else {
                    continue;
                };
                if conn.feedback {
                    continue;
                }
                if let Some(dst) = conn.destination_port().and_then(|p| self.ports.get(&p)) {
                    out.push(dst.node);
                }
            }
        }
        out
    }

    /// True iff exactly one port is an output, both or neither are
    /// sequence ports, and joining them would not close a cycle.
    pub fn can_connect(&self, a: PortId, b: PortId) -> bool {
        let Ok((src, dst)) = self.orient(a, b) else {
            return false;
        };
        let (Some(sp), Some(dp)) = (self.ports.get(&src), self.ports.get(&dst)) else {
            return false;
        };
        sp.is_sequence() == dp.is_sequence() && !self.precedes(dp.node, sp.node)
    }

    /// Orders two ports as (output, input).
    pub(crate) fn orient(&self, a: PortId, b: PortId) -> Result<(PortId, PortId), CoreError> {
        let pa = self.require_port(a)?;
        let pb = self.require_port(b)?;
        match (pa.direction, pb.direction) {
            (Direction::Output, Direction::Input) => Ok((a, b)),
            (Direction::Input, Direction::Output) => Ok((b, a)),
            _ => Err(CoreError::InvalidConnection {
                reason: "exactly one port must be an output".into(),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Lookup helpers
    // -----------------------------------------------------------------------

    pub(crate) fn require_node(&self, id: NodeId) -> Result<&Node, CoreError> {
        self.nodes.get(&id).ok_or(CoreError::NodeNotFound { id })
    }

    pub(crate) fn require_port(&self, id: PortId) -> Result<&Port, CoreError> {
        self.ports.get(&id).ok_or(CoreError::PortNotFound { id })
    }

    pub(crate) fn require_block(&self, id: BlockId) -> Result<&Block, CoreError> {
        self.blocks.get(&id).ok_or(CoreError::BlockNotFound { id })
    }

    pub(crate) fn require_connection(&self, id: ConnectionId) -> Result<&Connection, CoreError> {
        self.conns.get(&id).ok_or(CoreError::ConnectionNotFound { id })
    }

    /// Runs `f`, restoring the graph if it fails. Lets callers group
    /// several edits, type registry changes included, into one that either
    /// fully applies or leaves no trace.
    pub fn transaction<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, CoreError>,
    ) -> Result<T, CoreError> {
        let snapshot = self.clone();
        match f(self) {
            Ok(value) => Ok(value),
            Err(err) => {
                *self = snapshot;
                Err(err)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Allocation
    // -----------------------------------------------------------------------

    fn alloc_block(&mut self, parent: Option<BlockId>, owner: Option<NodeId>) -> BlockId {
        let id = BlockId(self.next_block.next());
        self.blocks.insert(id, Block::new(parent, owner));
        id
    }

    /// Creates a node with its nested blocks, inner ports nodes and initial
    /// ports. Performs no validation.
    pub(crate) fn alloc_node(&mut self, block: BlockId, kind: NodeKind) -> NodeId {
        let id = self.insert_node(block, kind);
        let block_count = self.nodes.get(&id).map_or(0, |n| n.kind.block_count());
        for _ in 0..block_count {
            let b = self.alloc_block(Some(block), Some(id));
            if let Some(n) = self.nodes.get_mut(&id) {
                n.blocks.push(b);
            }
        }
        let (kind, body) = match self.nodes.get(&id) {
            Some(n) => (n.kind.clone(), n.blocks.first().copied()),
            None => return id,
        };
        if let Some(body) = body {
            let roles: &[PortsRole] = match kind {
                NodeKind::Loop => &[PortsRole::LoopInputs],
                NodeKind::FuncLiteral => &[PortsRole::Inputs, PortsRole::Outputs],
                _ => &[],
            };
            for role in roles {
                let inner = self.alloc_node(body, NodeKind::Ports { role: *role });
                if let Some(n) = self.nodes.get_mut(&id) {
                    n.inner.push(inner);
                }
            }
        }
        self.init_ports(id);
        for pkg in self.node_packages(id) {
            self.pkg_refs.add(&pkg);
        }
        id
    }

    /// Inserts a bare node record without ports or nested blocks.
    pub(crate) fn insert_node(&mut self, block: BlockId, kind: NodeKind) -> NodeId {
        let id = NodeId(self.next_node.next());
        self.nodes.insert(
            id,
            Node {
                block,
                kind,
                inputs: Vec::new(),
                outputs: Vec::new(),
                blocks: SmallVec::new(),
                inner: SmallVec::new(),
                position: Point::default(),
            },
        );
        if let Some(b) = self.blocks.get_mut(&block) {
            b.nodes.insert(id);
        }
        self.events.insert(GraphEvent::BlockChanged(block));
        self.events.insert(GraphEvent::LayoutInvalidated(id));
        id
    }

    /// Inserts a bare block record. Used when rebuilding from the
    /// structural form.
    pub(crate) fn insert_block(&mut self, parent: Option<BlockId>, owner: Option<NodeId>) -> BlockId {
        self.alloc_block(parent, owner)
    }

    pub(crate) fn set_root(&mut self, root: BlockId, inputs: NodeId, outputs: NodeId) {
        self.root = root;
        self.inputs_node = inputs;
        self.outputs_node = outputs;
    }

    /// Empties the arenas, keeping name, package and types.
    pub(crate) fn clear_arena(&mut self) {
        self.blocks.clear();
        self.nodes.clear();
        self.ports.clear();
        self.conns.clear();
        self.pkg_refs = PackageRefs::default();
        self.events.clear();
        self.next_block = IdCounter::default();
        self.next_node = IdCounter::default();
        self.next_port = IdCounter::default();
        self.next_conn = IdCounter::default();
    }

    pub(crate) fn set_receiver(&mut self, receiver: bool) {
        self.receiver = receiver;
    }

    /// Appends a port to a node.
    pub(crate) fn new_port(
        &mut self,
        node: NodeId,
        direction: Direction,
        name: &str,
        ty: Option<TypeId>,
    ) -> PortId {
        let id = PortId(self.next_port.next());
        self.ports.insert(
            id,
            Port {
                node,
                direction,
                name: name.to_string(),
                ty,
                conns: SmallVec::new(),
            },
        );
        if let Some(n) = self.nodes.get_mut(&node) {
            match direction {
                Direction::Input => n.inputs.push(id),
                Direction::Output => n.outputs.push(id),
            }
        }
        self.events.insert(GraphEvent::LayoutInvalidated(node));
        id
    }

    /// Removes a port and every connection attached to it. Returns the
    /// nodes at the far end of those connections.
    pub(crate) fn drop_port(&mut self, port: PortId) -> Vec<NodeId> {
        let mut neighbours = Vec::new();
        let conns: Vec<ConnectionId> = self
            .ports
            .get(&port)
            .map(|p| p.conns.to_vec())
            .unwrap_or_default();
        for c in conns {
            neighbours.extend(self.drop_connection(c));
        }
        if let Some(p) = self.ports.shift_remove(&port) {
            if let Some(n) = self.nodes.get_mut(&p.node) {
                n.inputs.retain(|x| *x != port);
                n.outputs.retain(|x| *x != port);
            }
            self.events.insert(GraphEvent::LayoutInvalidated(p.node));
            neighbours.retain(|n| *n != p.node);
        }
        neighbours
    }

    /// Sets a port's type, recording a layout event on change.
    pub(crate) fn set_port_type(&mut self, port: PortId, ty: Option<TypeId>) -> bool {
        let Some(p) = self.ports.get_mut(&port) else {
            return false;
        };
        if p.ty == ty {
            return false;
        }
        p.ty = ty;
        let node = p.node;
        self.events.insert(GraphEvent::LayoutInvalidated(node));
        true
    }

    pub(crate) fn node_packages(&self, id: NodeId) -> BTreeSet<String> {
        let Some(node) = self.nodes.get(&id) else {
            return BTreeSet::new();
        };
        let mut out = node.kind.packages(&self.types);
        if let NodeKind::Ports {
            role: PortsRole::Inputs | PortsRole::Outputs,
        } = node.kind
        {
            for p in node.inputs.iter().chain(node.outputs.iter()) {
                if let Some(ty) = self.ports.get(p).and_then(|p| p.ty) {
                    out.extend(self.types.packages_of(ty));
                }
            }
        }
        out.remove(&self.package);
        out
    }

    /// Applies the package reference delta of a binding change.
    pub(crate) fn update_pkg_refs(&mut self, before: &BTreeSet<String>, after: &BTreeSet<String>) {
        for pkg in before {
            self.pkg_refs.sub(pkg);
        }
        for pkg in after {
            self.pkg_refs.add(pkg);
        }
    }

    // -----------------------------------------------------------------------
    // Node editing
    // -----------------------------------------------------------------------

    /// Adds a node of `kind` to `block` and returns its id.
    ///
    /// Ports nodes cannot be added directly; they come with the function or
    /// with their Loop or FuncLiteral owner.
    pub fn add_node(&mut self, block: BlockId, kind: NodeKind) -> Result<NodeId, CoreError> {
        self.require_block(block)?;
        let kind = self.prepare_kind(block, kind)?;
        let id = self.alloc_node(block, kind);
        tracing::debug!(node = %id, block = %block, "added node");
        Ok(id)
    }

    fn prepare_kind(&self, block: BlockId, kind: NodeKind) -> Result<NodeKind, CoreError> {
        kind.validate()?;
        match kind {
            NodeKind::Ports { .. } => Err(CoreError::UnsupportedBinding {
                reason: "ports nodes belong to their function or loop".into(),
            }),
            NodeKind::Branch { kind: branch } if self.enclosing_loop(block).is_none() => {
                Err(CoreError::UnsupportedBinding {
                    reason: format!("{} outside a loop", branch.keyword()),
                })
            }
            NodeKind::Literal { kind, text } => {
                let (kind, text) = crate::kind::normalize_literal(kind, &text)?;
                Ok(NodeKind::Literal { kind, text })
            }
            NodeKind::Composite { ty, .. }
            | NodeKind::Convert { ty }
            | NodeKind::Make { ty }
            | NodeKind::TypeAssert { ty } => {
                if let Some(ty) = ty {
                    self.check_bound_type(&kind, ty)?;
                }
                Ok(kind)
            }
            other => Ok(other),
        }
    }

    /// True for ports nodes, which live and die with their owner.
    fn is_anchored(&self, id: NodeId) -> bool {
        matches!(
            self.nodes.get(&id).map(|n| &n.kind),
            Some(NodeKind::Ports { .. })
        )
    }

    /// Removes a node, its nested blocks and everything inside them, and
    /// every connection touching any removed port.
    pub fn remove_node(&mut self, id: NodeId) -> Result<Node, CoreError> {
        self.require_node(id)?;
        if self.is_anchored(id) {
            return Err(CoreError::UnsupportedBinding {
                reason: "ports nodes cannot be removed on their own".into(),
            });
        }
        self.transaction(|g| {
            let mut doomed: Vec<NodeId> = vec![id];
            doomed.extend(g.nested_nodes(id));
            let doomed_set: HashSet<NodeId> = doomed.iter().copied().collect();

            let mut neighbours = Vec::new();
            for n in &doomed {
                let ports: Vec<PortId> = g
                    .nodes
                    .get(n)
                    .map(|n| n.inputs.iter().chain(n.outputs.iter()).copied().collect())
                    .unwrap_or_default();
                for p in ports {
                    let conns: Vec<ConnectionId> =
                        g.ports.get(&p).map(|p| p.conns.to_vec()).unwrap_or_default();
                    for c in conns {
                        neighbours.extend(g.drop_connection(c));
                    }
                }
            }

            let mut removed = None;
            for n in doomed.iter().rev() {
                let packages = g.node_packages(*n);
                for pkg in &packages {
                    g.pkg_refs.sub(pkg);
                }
                let Some(node) = g.nodes.shift_remove(n) else {
                    continue;
                };
                for p in node.inputs.iter().chain(node.outputs.iter()) {
                    g.ports.shift_remove(p);
                }
                for b in &node.blocks {
                    g.blocks.shift_remove(b);
                }
                if let Some(block) = g.blocks.get_mut(&node.block) {
                    block.nodes.shift_remove(n);
                }
                g.events.insert(GraphEvent::BlockChanged(node.block));
                g.events.shift_remove(&GraphEvent::LayoutInvalidated(*n));
                if *n == id {
                    removed = Some(node);
                }
            }

            let mut seen = HashSet::new();
            for n in neighbours {
                if !doomed_set.contains(&n) && seen.insert(n) {
                    g.connections_changed(n)?;
                }
            }
            tracing::debug!(node = %id, cascade = doomed.len(), "removed node");
            removed.ok_or(CoreError::NodeNotFound { id })
        })
    }

    /// Moves a node. Only layout changes.
    pub fn set_position(&mut self, id: NodeId, at: Point) -> Result<(), CoreError> {
        let node = self
            .nodes
            .get_mut(&id)
            .ok_or(CoreError::NodeNotFound { id })?;
        node.position = at;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Connection editing
    // -----------------------------------------------------------------------

    /// Allocates a connection and attaches it to whichever endpoints are
    /// ports. Does not react or validate.
    pub(crate) fn alloc_connection(
        &mut self,
        source: Endpoint,
        destination: Endpoint,
        feedback: bool,
    ) -> ConnectionId {
        let id = ConnectionId(self.next_conn.next());
        self.conns.insert(
            id,
            Connection {
                block: self.root,
                source,
                destination,
                feedback,
            },
        );
        for end in [source, destination] {
            if let Some(p) = end.port().and_then(|p| self.ports.get_mut(&p)) {
                p.conns.push(id);
            }
        }
        self.reblock(id);
        id
    }

    /// Detaches and deletes a connection. Returns the nodes it touched.
    pub(crate) fn drop_connection(&mut self, id: ConnectionId) -> Vec<NodeId> {
        let Some(conn) = self.conns.shift_remove(&id) else {
            return Vec::new();
        };
        let mut touched = Vec::new();
        for end in [conn.source, conn.destination] {
            if let Some(port) = end.port().and_then(|p| self.ports.get_mut(&p)) {
                port.conns.retain(|c| *c != id);
                touched.push(port.node);
            }
        }
        if let Some(block) = self.blocks.get_mut(&conn.block) {
            block.conns.shift_remove(&id);
        }
        self.events.insert(GraphEvent::BlockChanged(conn.block));
        touched
    }

    /// Recomputes the owning block of a connection from its endpoints.
    pub(crate) fn reblock(&mut self, id: ConnectionId) {
        let Some(conn) = self.conns.get(&id) else {
            return;
        };
        let block_of = |end: Endpoint| {
            end.port()
                .and_then(|p| self.ports.get(&p))
                .and_then(|p| self.nodes.get(&p.node))
                .map(|n| n.block)
        };
        let target = match (block_of(conn.source), block_of(conn.destination)) {
            (Some(a), Some(b)) => self.lca(a, b),
            (Some(a), None) | (None, Some(a)) => a,
            (None, None) => conn.block,
        };
        let old = conn.block;
        if let Some(b) = self.blocks.get_mut(&old) {
            b.conns.shift_remove(&id);
        }
        if let Some(b) = self.blocks.get_mut(&target) {
            b.conns.insert(id);
        }
        if let Some(c) = self.conns.get_mut(&id) {
            c.block = target;
        }
        if old != target {
            self.events.insert(GraphEvent::BlockChanged(old));
        }
        self.events.insert(GraphEvent::BlockChanged(target));
    }

    /// Re-points one end of a connection, detaching from the previous port.
    /// Attaching to an input that already holds a connection of the same
    /// feedback kind removes that connection first.
    fn set_endpoint(
        &mut self,
        id: ConnectionId,
        end: End,
        new: Endpoint,
    ) -> Result<(), CoreError> {
        let conn = self.require_connection(id)?.clone();
        if let Some(port) = new.port() {
            let p = self.require_port(port)?;
            let wanted = match end {
                End::Source => Direction::Output,
                End::Destination => Direction::Input,
            };
            if p.direction != wanted {
                return Err(CoreError::InvalidConnection {
                    reason: match end {
                        End::Source => "source must be an output port".into(),
                        End::Destination => "destination must be an input port".into(),
                    },
                });
            }
        }
        let old = match end {
            End::Source => conn.source,
            End::Destination => conn.destination,
        };

        let mut touched = Vec::new();
        if let Some(p) = old.port().and_then(|p| self.ports.get_mut(&p)) {
            p.conns.retain(|c| *c != id);
            touched.push(p.node);
        }
        // The input this edit leaves the connection attached to, if both
        // ends are bound once it is done.
        let input = match end {
            End::Destination => new.port(),
            End::Source => new.port().and(conn.destination_port()),
        };
        if let Some(input) = input {
            let displaced: Vec<ConnectionId> = self
                .ports
                .get(&input)
                .map(|p| {
                    p.conns
                        .iter()
                        .copied()
                        .filter(|c| {
                            *c != id
                                && self.conns.get(c).is_some_and(|c| c.feedback == conn.feedback)
                        })
                        .collect()
                })
                .unwrap_or_default();
            for c in displaced {
                touched.extend(self.drop_connection(c));
            }
        }
        if let Some(port) = new.port() {
            if let Some(p) = self.ports.get_mut(&port) {
                p.conns.push(id);
                touched.push(p.node);
            }
        }
        if let Some(c) = self.conns.get_mut(&id) {
            match end {
                End::Source => c.source = new,
                End::Destination => c.destination = new,
            }
        }
        self.reblock(id);

        let mut seen = HashSet::new();
        for n in touched {
            if seen.insert(n) && self.nodes.contains_key(&n) {
                self.connections_changed(n)?;
            }
        }
        Ok(())
    }

    /// Attaches the source end to `port`, or leaves it dangling. Binding
    /// both ends applies the same checks as [`connect`](Self::connect).
    pub fn set_source(&mut self, id: ConnectionId, port: Option<PortId>) -> Result<(), CoreError> {
        let conn = self.require_connection(id)?;
        if let (Some(src), Some(dst)) = (port, conn.destination_port()) {
            self.check_connection(src, dst, conn.feedback)?;
        }
        self.transaction(|g| {
            let end = g.endpoint_or_dangling(id, End::Source, port)?;
            g.set_endpoint(id, End::Source, end)
        })
    }

    /// Attaches the destination end to `port`, or leaves it dangling.
    pub fn set_destination(
        &mut self,
        id: ConnectionId,
        port: Option<PortId>,
    ) -> Result<(), CoreError> {
        let conn = self.require_connection(id)?;
        if let (Some(src), Some(dst)) = (conn.source_port(), port) {
            self.check_connection(src, dst, conn.feedback)?;
        }
        self.transaction(|g| {
            let end = g.endpoint_or_dangling(id, End::Destination, port)?;
            g.set_endpoint(id, End::Destination, end)
        })
    }

    fn endpoint_or_dangling(
        &self,
        id: ConnectionId,
        end: End,
        port: Option<PortId>,
    ) -> Result<Endpoint, CoreError> {
        if let Some(p) = port {
            return Ok(Endpoint::Port(p));
        }
        let conn = self.require_connection(id)?;
        let current = match end {
            End::Source => conn.source,
            End::Destination => conn.destination,
        };
        Ok(match current {
            Endpoint::Dangling(at) => Endpoint::Dangling(at),
            Endpoint::Port(_) => Endpoint::Dangling(Point::default()),
        })
    }

    /// Detaches the source end, leaving it dangling at `at`.
    pub fn disconnect_source(&mut self, id: ConnectionId, at: Point) -> Result<(), CoreError> {
        self.transaction(|g| g.set_endpoint(id, End::Source, Endpoint::Dangling(at)))
    }

    /// Detaches the destination end, leaving it dangling at `at`.
    pub fn disconnect_destination(&mut self, id: ConnectionId, at: Point) -> Result<(), CoreError> {
        self.transaction(|g| g.set_endpoint(id, End::Destination, Endpoint::Dangling(at)))
    }

    /// Moves the dangling end(s) of a connection being dragged.
    pub fn move_dangling(&mut self, id: ConnectionId, at: Point) -> Result<(), CoreError> {
        let conn = self
            .conns
            .get_mut(&id)
            .ok_or(CoreError::ConnectionNotFound { id })?;
        for end in [&mut conn.source, &mut conn.destination] {
            if let Endpoint::Dangling(p) = end {
                *p = at;
            }
        }
        Ok(())
    }

    /// Deletes a connection and lets both neighbouring nodes react. An
    /// element input of an append or variadic call left without a
    /// connection is removed with it.
    pub fn remove_connection(&mut self, id: ConnectionId) -> Result<Connection, CoreError> {
        let conn = self.require_connection(id)?.clone();
        let element = conn
            .destination_port()
            .filter(|p| !conn.feedback && self.is_element_port(*p));
        self.transaction(|g| {
            let mut touched = g.drop_connection(id);
            if let Some(p) = element {
                if g.ports.get(&p).is_some_and(|p| p.conns.is_empty()) {
                    touched.extend(g.drop_port(p));
                }
            }
            let mut seen = HashSet::new();
            for n in touched {
                if seen.insert(n) && g.nodes.contains_key(&n) {
                    g.connections_changed(n)?;
                }
            }
            Ok(conn)
        })
    }

    /// Starts an interactive connection from `port`; the other end dangles
    /// at `at`.
    pub fn begin_connection(&mut self, port: PortId, at: Point) -> Result<ConnectionId, CoreError> {
        let p = self.require_port(port)?;
        let id = if p.is_output() {
            self.alloc_connection(Endpoint::Port(port), Endpoint::Dangling(at), false)
        } else {
            self.alloc_connection(Endpoint::Dangling(at), Endpoint::Port(port), false)
        };
        Ok(id)
    }

    /// Binds the dangling end of an interactive connection to `port`, with
    /// the same checks as [`connect`](Self::connect).
    pub fn complete_connection(&mut self, id: ConnectionId, port: PortId) -> Result<(), CoreError> {
        let conn = self.require_connection(id)?.clone();
        let (end, src, dst) = match (conn.source_port(), conn.destination_port()) {
            (Some(src), None) => (End::Destination, src, port),
            (None, Some(dst)) => (End::Source, port, dst),
            _ => {
                return Err(CoreError::InvalidConnection {
                    reason: "connection has no dangling end".into(),
                })
            }
        };
        let (src, dst) = self.orient(src, dst)?;
        self.check_connection(src, dst, conn.feedback)?;
        let target = match end {
            End::Source => src,
            End::Destination => dst,
        };
        self.transaction(|g| g.set_endpoint(id, end, Endpoint::Port(target)))
    }

    /// Connects two ports (in either order) after checking direction,
    /// sequence-ness, node acceptance, type compatibility and acyclicity.
    pub fn connect(&mut self, a: PortId, b: PortId) -> Result<ConnectionId, CoreError> {
        self.connect_kind(a, b, false)
    }

    /// Connects a reassignment edge. Exempt from the cycle check.
    pub fn connect_feedback(&mut self, a: PortId, b: PortId) -> Result<ConnectionId, CoreError> {
        self.connect_kind(a, b, true)
    }

    fn connect_kind(&mut self, a: PortId, b: PortId, feedback: bool) -> Result<ConnectionId, CoreError> {
        let (src, dst) = self.orient(a, b)?;
        self.check_connection(src, dst, feedback)?;
        self.transaction(|g| {
            let id = g.alloc_connection(
                Endpoint::Port(src),
                Endpoint::Dangling(Point::default()),
                feedback,
            );
            g.set_endpoint(id, End::Destination, Endpoint::Port(dst))?;
            if let Some(n) = g.ports.get(&src).map(|p| p.node) {
                g.connections_changed(n)?;
            }
            tracing::debug!(connection = %id, source = %src, destination = %dst, feedback, "connected");
            Ok(id)
        })
    }

    /// Marks or unmarks a connection as feedback. Clearing the flag is
    /// subject to the cycle check.
    pub fn set_feedback(&mut self, id: ConnectionId, feedback: bool) -> Result<(), CoreError> {
        let conn = self.require_connection(id)?.clone();
        if conn.feedback == feedback {
            return Ok(());
        }
        if !feedback {
            if let (Some(src), Some(dst)) = (conn.source_port(), conn.destination_port()) {
                let sn = self.require_port(src)?.node;
                let dn = self.require_port(dst)?.node;
                // The connection is still feedback here, so the search skips it.
                if self.precedes(dn, sn) {
                    return Err(CoreError::CycleRejected {
                        source_node: sn,
                        destination_node: dn,
                    });
                }
            }
        }
        self.transaction(|g| {
            if let Some(c) = g.conns.get_mut(&id) {
                c.feedback = feedback;
            }
            // Re-attach to apply the input slot rule to the new kind.
            if let Some(dst) = conn.destination_port() {
                g.set_endpoint(id, End::Destination, Endpoint::Port(dst))?;
            }
            Ok(())
        })
    }

    /// Validates a prospective connection from output `src` to input `dst`.
    pub(crate) fn check_connection(
        &self,
        src: PortId,
        dst: PortId,
        feedback: bool,
    ) -> Result<(), CoreError> {
        let sp = self.require_port(src)?;
        let dp = self.require_port(dst)?;
        if sp.is_sequence() != dp.is_sequence() {
            return Err(CoreError::InvalidConnection {
                reason: "sequence ports connect only to sequence ports".into(),
            });
        }
        if !feedback && self.precedes(dp.node, sp.node) {
            return Err(CoreError::CycleRejected {
                source_node: sp.node,
                destination_node: dp.node,
            });
        }
        if sp.is_sequence() {
            return Ok(());
        }
        if !feedback && self.input_follows_source(dst) {
            return self.accepts(dst, sp.ty);
        }
        if !assignable(&self.types, sp.ty, dp.ty) {
            return Err(self.mismatch(sp.ty, dp.ty));
        }
        Ok(())
    }

    pub(crate) fn mismatch(&self, from: Option<TypeId>, to: Option<TypeId>) -> CoreError {
        let show = |t: Option<TypeId>| t.map_or("unresolved".to_string(), |t| self.types.display(t));
        CoreError::TypeMismatch {
            source_type: show(from),
            destination_type: show(to),
        }
    }

    /// Whether the input port's type is derived from its source.
    pub(crate) fn input_follows_source(&self, port: PortId) -> bool {
        let Some(p) = self.ports.get(&port) else {
            return false;
        };
        let Some(node) = self.nodes.get(&p.node) else {
            return false;
        };
        node.data_inputs()
            .iter()
            .position(|x| *x == port)
            .is_some_and(|i| node.kind.follows_source(i))
    }

    // -----------------------------------------------------------------------
    // Integrity
    // -----------------------------------------------------------------------

    /// Verifies referential integrity of the arena: every id resolves and
    /// every back reference agrees with its forward reference.
    pub fn check_integrity(&self) -> Result<(), CoreError> {
        let broken = |reason: String| Err(CoreError::GraphInconsistency { reason });
        for (id, block) in &self.blocks {
            for n in &block.nodes {
                match self.nodes.get(n) {
                    Some(node) if node.block == *id => {}
                    _ => return broken(format!("block {} lists foreign node {}", id, n)),
                }
            }
            for c in &block.conns {
                match self.conns.get(c) {
                    Some(conn) if conn.block == *id => {}
                    _ => return broken(format!("block {} lists foreign connection {}", id, c)),
                }
            }
        }
        for (id, node) in &self.nodes {
            if !self.blocks.get(&node.block).is_some_and(|b| b.nodes.contains(id)) {
                return broken(format!("node {} missing from its block", id));
            }
            for p in node.inputs.iter().chain(node.outputs.iter()) {
                if self.ports.get(p).map(|p| p.node) != Some(*id) {
                    return broken(format!("node {} lists foreign port {}", id, p));
                }
            }
        }
        for (id, port) in &self.ports {
            for c in &port.conns {
                let Some(conn) = self.conns.get(c) else {
                    return broken(format!("port {} references missing connection {}", id, c));
                };
                if conn.source_port() != Some(*id) && conn.destination_port() != Some(*id) {
                    return broken(format!("port {} lists unrelated connection {}", id, c));
                }
            }
        }
        for (id, conn) in &self.conns {
            for end in [conn.source, conn.destination] {
                if let Some(p) = end.port() {
                    if !self.ports.get(&p).is_some_and(|p| p.conns.contains(id)) {
                        return broken(format!("connection {} references port {}", id, p));
                    }
                }
            }
        }
        Ok(())
    }
}
