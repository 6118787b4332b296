//! Private structural form of a function graph.
//!
//! The structural form is what a later load reads back: nodes with their
//! variant and per-variant state, port type descriptors, and connections
//! given as (node index, port index) pairs. Identifiers are not stored;
//! every reference is a position in one of the lists, so a decoded graph
//! is isomorphic to the encoded one up to relabelling.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::graph::FunctionGraph;
use crate::id::{BlockId, NodeId, PortId};
use crate::kind::{NodeKind, PortsRole};
use crate::node::{Direction, Endpoint, Point};
use crate::type_id::{TypeId, TypeRegistry};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuralForm {
    pub name: String,
    pub package: String,
    #[serde(default)]
    pub receiver: bool,
    pub types: TypeRegistry,
    pub blocks: Vec<BlockRecord>,
    pub nodes: Vec<NodeRecord>,
    pub connections: Vec<ConnectionRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub parent: Option<usize>,
    pub owner: Option<usize>,
    /// Position among the owner's blocks: 0 then, 1 else.
    #[serde(default)]
    pub slot: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub block: usize,
    pub kind: NodeKind,
    pub inputs: Vec<PortRecord>,
    pub outputs: Vec<PortRecord>,
    /// Sequence id when the node's sequence output is connected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u32>,
    #[serde(default)]
    pub position: Point,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRecord {
    pub name: String,
    pub ty: Option<TypeId>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub spread: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    pub source: (usize, usize),
    pub destination: (usize, usize),
    #[serde(default)]
    pub feedback: bool,
}

impl StructuralForm {
    /// Encodes a graph. Dangling connections are not part of the form.
    pub fn from_graph(graph: &FunctionGraph) -> Self {
        let block_index: HashMap<BlockId, usize> =
            graph.blocks().enumerate().map(|(i, (id, _))| (id, i)).collect();
        let node_index: HashMap<NodeId, usize> =
            graph.nodes().enumerate().map(|(i, (id, _))| (id, i)).collect();

        let blocks = graph
            .blocks()
            .map(|(id, b)| BlockRecord {
                parent: b.parent.and_then(|p| block_index.get(&p).copied()),
                owner: b.owner.and_then(|o| node_index.get(&o).copied()),
                slot: b
                    .owner
                    .and_then(|o| graph.get_node(o))
                    .and_then(|o| o.blocks.iter().position(|x| *x == id))
                    .unwrap_or(0),
            })
            .collect();

        let nodes = graph
            .nodes()
            .map(|(id, n)| {
                let spread_port = spread_port(graph, id);
                let record = |p: &PortId| {
                    let port = graph.get_port(*p);
                    PortRecord {
                        name: port.map(|p| p.name.clone()).unwrap_or_default(),
                        ty: port.and_then(|p| p.ty),
                        spread: spread_port == Some(*p),
                    }
                };
                let seq = n
                    .seq_output()
                    .and_then(|p| graph.get_port(p))
                    .filter(|p| !p.conns.is_empty())
                    .and_then(|_| node_index.get(&id))
                    .map(|i| *i as u32);
                NodeRecord {
                    block: block_index.get(&n.block).copied().unwrap_or(0),
                    kind: n.kind.clone(),
                    inputs: n.inputs.iter().map(record).collect(),
                    outputs: n.outputs.iter().map(record).collect(),
                    seq,
                    position: n.position,
                }
            })
            .collect();

        let locate = |port: PortId| -> Option<(usize, usize)> {
            let p = graph.get_port(port)?;
            let node = graph.get_node(p.node)?;
            let list = match p.direction {
                Direction::Input => &node.inputs,
                Direction::Output => &node.outputs,
            };
            Some((*node_index.get(&p.node)?, list.iter().position(|x| *x == port)?))
        };
        let connections = graph
            .connections()
            .filter_map(|(_, c)| {
                Some(ConnectionRecord {
                    source: locate(c.source_port()?)?,
                    destination: locate(c.destination_port()?)?,
                    feedback: c.feedback,
                })
            })
            .collect();

        StructuralForm {
            name: graph.name().to_string(),
            package: graph.package().to_string(),
            receiver: graph.has_receiver(),
            types: graph.types.clone(),
            blocks,
            nodes,
            connections,
        }
    }

    /// Rebuilds the graph described by this form.
    ///
    /// Only referential consistency is checked here; whole-graph invariants
    /// are the caller's concern.
    pub fn into_graph(self) -> Result<FunctionGraph, CoreError> {
        let bad = |reason: String| CoreError::GraphInconsistency { reason };
        let mut graph = FunctionGraph::with_types(&self.package, &self.name, self.types);
        graph.clear_arena();
        graph.set_receiver(self.receiver);

        let node_count = self.nodes.len();
        let block_count = self.blocks.len();
        let mut root = None;
        for (i, b) in self.blocks.iter().enumerate() {
            // Parents precede their children, which also rules out cycles.
            if b.parent.is_some_and(|p| p >= i) || b.owner.is_some_and(|o| o >= node_count) {
                return Err(bad(format!("block {} references a missing block or node", i)));
            }
            if let Some(o) = b.owner {
                if Some(self.nodes[o].block) != b.parent {
                    return Err(bad(format!("block {} is not nested in its owner's block", i)));
                }
            }
            if b.parent.is_none() {
                if b.owner.is_some() || root.is_some() {
                    return Err(bad("the form must have exactly one root block".into()));
                }
                root = Some(BlockId(i as u32));
            }
            graph.insert_block(b.parent.map(|p| BlockId(p as u32)), b.owner.map(|o| NodeId(o as u32)));
        }
        let root = root.ok_or_else(|| bad("the form has no root block".into()))?;

        let mut ports: Vec<(Vec<PortId>, Vec<PortId>)> = Vec::with_capacity(node_count);
        for (i, n) in self.nodes.iter().enumerate() {
            if n.block >= block_count {
                return Err(bad(format!("node {} is in a missing block", i)));
            }
            n.kind.validate()?;
            let id = graph.insert_node(BlockId(n.block as u32), n.kind.clone());
            let inputs = n
                .inputs
                .iter()
                .map(|p| graph.new_port(id, Direction::Input, &p.name, p.ty))
                .collect();
            let outputs = n
                .outputs
                .iter()
                .map(|p| graph.new_port(id, Direction::Output, &p.name, p.ty))
                .collect();
            ports.push((inputs, outputs));
            if let Some(node) = graph.nodes.get_mut(&id) {
                node.position = n.position;
            }
        }

        // Nested blocks in slot order, then the ports nodes they anchor.
        let mut owned: Vec<(usize, usize, BlockId)> = self
            .blocks
            .iter()
            .enumerate()
            .filter_map(|(i, b)| b.owner.map(|o| (o, b.slot, BlockId(i as u32))))
            .collect();
        owned.sort();
        for (owner, _, block) in owned {
            if let Some(n) = graph.nodes.get_mut(&NodeId(owner as u32)) {
                n.blocks.push(block);
            }
        }
        let mut inputs_node = None;
        let mut outputs_node = None;
        for (i, n) in self.nodes.iter().enumerate() {
            let NodeKind::Ports { role } = n.kind else {
                continue;
            };
            let block = BlockId(n.block as u32);
            if block == root {
                match role {
                    PortsRole::Inputs if inputs_node.is_none() => inputs_node = Some(NodeId(i as u32)),
                    PortsRole::Outputs if outputs_node.is_none() => {
                        outputs_node = Some(NodeId(i as u32))
                    }
                    _ => return Err(bad(format!("unexpected ports node {} in the root block", i))),
                }
                continue;
            }
            let owner = self.blocks[n.block].owner.map(|o| NodeId(o as u32));
            match owner.and_then(|o| graph.nodes.get_mut(&o)) {
                Some(o) => o.inner.push(NodeId(i as u32)),
                None => return Err(bad(format!("ports node {} has no owner", i))),
            }
        }
        let (Some(inputs_node), Some(outputs_node)) = (inputs_node, outputs_node) else {
            return Err(bad("the root block lacks its ports nodes".into()));
        };
        graph.set_root(root, inputs_node, outputs_node);

        for (i, c) in self.connections.iter().enumerate() {
            let source = ports
                .get(c.source.0)
                .and_then(|(_, outs)| outs.get(c.source.1))
                .copied();
            let destination = ports
                .get(c.destination.0)
                .and_then(|(ins, _)| ins.get(c.destination.1))
                .copied();
            let (Some(s), Some(d)) = (source, destination) else {
                return Err(bad(format!("connection {} references a missing port", i)));
            };
            graph.alloc_connection(Endpoint::Port(s), Endpoint::Port(d), c.feedback);
        }

        let ids: Vec<NodeId> = graph.nodes().map(|(id, _)| id).collect();
        for id in ids {
            for pkg in graph.node_packages(id) {
                graph.pkg_refs.add(&pkg);
            }
        }
        graph.check_integrity()?;
        graph.drain_events();
        Ok(graph)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// The input that passes a whole slice in a spread append or call.
fn spread_port(graph: &FunctionGraph, id: NodeId) -> Option<PortId> {
    let node = graph.get_node(id)?;
    match node.kind {
        NodeKind::Append { spread: true } | NodeKind::Call { spread: true, .. } => {
            node.inputs.last().copied()
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::LiteralKind;

    fn sample() -> FunctionGraph {
        let mut g = FunctionGraph::new("example.com/calc", "double");
        let sig = crate::types::Signature {
            params: vec![crate::types::Param {
                name: "x".into(),
                ty: TypeId::INT,
            }],
            results: vec![crate::types::Param {
                name: "r".into(),
                ty: TypeId::INT,
            }],
            variadic: false,
        };
        g.set_signature(None, &sig).unwrap();
        let root = g.root_block();
        let two = g
            .add_node(
                root,
                NodeKind::Literal {
                    kind: LiteralKind::Int,
                    text: "2".into(),
                },
            )
            .unwrap();
        let mul = g
            .add_node(
                root,
                NodeKind::Operator {
                    op: "*".into(),
                    unary: false,
                },
            )
            .unwrap();
        let x = g.get_node(g.inputs_node()).unwrap().outputs[0];
        let r = g.get_node(g.outputs_node()).unwrap().inputs[0];
        let two_out = g.get_node(two).unwrap().outputs[0];
        let (a, b) = {
            let n = g.get_node(mul).unwrap();
            (n.inputs[0], n.inputs[1])
        };
        let out = g.get_node(mul).unwrap().outputs[0];
        g.connect(x, a).unwrap();
        g.connect(two_out, b).unwrap();
        g.connect(out, r).unwrap();
        g
    }

    #[test]
    fn encodes_connections_by_index() {
        let g = sample();
        let form = StructuralForm::from_graph(&g);
        assert_eq!(form.nodes.len(), 4);
        assert_eq!(form.connections.len(), 3);
        assert_eq!(form.blocks.len(), 1);
        assert_eq!(form.connections[0].source, (0, 0));
        assert_eq!(form.connections[0].destination, (3, 0));
    }

    #[test]
    fn decode_restores_an_isomorphic_graph() {
        let g = sample();
        let json = StructuralForm::from_graph(&g).to_json().unwrap();
        let back = StructuralForm::from_json(&json).unwrap().into_graph().unwrap();
        assert_eq!(back.node_count(), g.node_count());
        assert_eq!(back.connection_count(), g.connection_count());
        assert_eq!(StructuralForm::from_graph(&back), StructuralForm::from_graph(&g));
        assert_eq!(back.signature(), g.signature());
    }

    #[test]
    fn rejects_out_of_range_ports() {
        let mut form = StructuralForm::from_graph(&sample());
        form.connections[0].destination = (3, 7);
        assert!(matches!(
            form.into_graph(),
            Err(CoreError::GraphInconsistency { .. })
        ));
    }

    #[test]
    fn rejects_self_referential_type_table() {
        let json = StructuralForm::from_graph(&sample()).to_json().unwrap();
        let mut value: serde_json::Value = serde_json::from_str(&json).unwrap();
        let types = value["types"].as_array_mut().unwrap();
        let own = types.len();
        types.push(serde_json::json!({ "Pointer": { "elem": own } }));
        let garbage = value.to_string();
        assert!(StructuralForm::from_json(&garbage).is_err());

        // Pointing back at an earlier entry is fine.
        let types = value["types"].as_array_mut().unwrap();
        types[own] = serde_json::json!({ "Slice": { "elem": own - 1 } });
        let form = StructuralForm::from_json(&value.to_string()).unwrap();
        assert_eq!(form.types.len(), own + 1);
    }

    #[test]
    fn named_types_may_refer_forward() {
        use crate::types::{FluxType, NamedDef};

        let mut types: Vec<FluxType> = TypeRegistry::new().into();
        let own = types.len() as u32;
        types.push(FluxType::Named(NamedDef {
            name: "List".into(),
            package: Some("example.com/calc".into()),
            underlying: Some(TypeId(own + 1)),
            methods: Default::default(),
        }));
        types.push(FluxType::Pointer { elem: TypeId(own) });
        assert!(TypeRegistry::try_from(types).is_ok());
    }

    #[test]
    fn rejects_a_form_without_root() {
        let mut form = StructuralForm::from_graph(&sample());
        form.blocks[0].parent = Some(0);
        assert!(form.into_graph().is_err());
    }
}
