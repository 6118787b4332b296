//! Invariant checks over a complete function graph.
//!
//! All checks are pure: they read the graph and never modify it.

use std::collections::HashMap;

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};

use flux_core::assign::assignable;
use flux_core::graph::FunctionGraph;
use flux_core::id::{BlockId, NodeId};
use flux_core::kind::NodeKind;
use flux_core::node::Direction;

use crate::diagnostics::GraphDiagnostic;

/// Checks every structural invariant and returns all violations found.
///
/// Dangling connections are reported, as a completed edit never leaves one
/// behind.
pub fn validate_graph(graph: &FunctionGraph) -> Vec<GraphDiagnostic> {
    let mut out = Vec::new();
    if let Err(err) = graph.check_integrity() {
        // Later checks assume consistent back references.
        out.push(GraphDiagnostic::Integrity {
            reason: err.to_string(),
        });
        return out;
    }
    check_connections(graph, &mut out);
    check_slots(graph, &mut out);
    check_cycles(graph, &mut out);
    check_branches(graph, &mut out);
    out
}

/// True if [`validate_graph`] finds nothing.
pub fn is_valid(graph: &FunctionGraph) -> bool {
    validate_graph(graph).is_empty()
}

fn node_block(graph: &FunctionGraph, node: NodeId) -> Option<BlockId> {
    graph.get_node(node).map(|n| n.block)
}

fn check_connections(graph: &FunctionGraph, out: &mut Vec<GraphDiagnostic>) {
    for (id, conn) in graph.connections() {
        let (Some(src), Some(dst)) = (conn.source_port(), conn.destination_port()) else {
            out.push(GraphDiagnostic::Dangling { connection: id });
            continue;
        };
        let (Some(sp), Some(dp)) = (graph.get_port(src), graph.get_port(dst)) else {
            continue;
        };
        if sp.direction != Direction::Output || dp.direction != Direction::Input {
            out.push(GraphDiagnostic::Integrity {
                reason: format!("connection {} runs against port directions", id),
            });
            continue;
        }
        if let (Some(a), Some(b)) = (node_block(graph, sp.node), node_block(graph, dp.node)) {
            let expected = graph.lca(a, b);
            if expected != conn.block {
                out.push(GraphDiagnostic::Misplaced {
                    connection: id,
                    expected,
                    actual: conn.block,
                });
            }
        }
        if sp.is_sequence() != dp.is_sequence() {
            out.push(GraphDiagnostic::SequenceMismatch { connection: id });
            continue;
        }
        if !assignable(&graph.types, sp.ty, dp.ty) {
            let show = |t: Option<flux_core::TypeId>| {
                t.map_or("unresolved".to_string(), |t| graph.types.display(t))
            };
            out.push(GraphDiagnostic::TypeMismatch {
                connection: id,
                source_type: show(sp.ty),
                destination_type: show(dp.ty),
            });
        }
    }
}

/// Each input holds at most one plain and one feedback connection.
fn check_slots(graph: &FunctionGraph, out: &mut Vec<GraphDiagnostic>) {
    for (id, port) in graph.ports() {
        if port.direction != Direction::Input {
            continue;
        }
        let (mut plain, mut feedback) = (0, 0);
        for c in &port.conns {
            match graph.get_connection(*c) {
                Some(conn) if conn.feedback => feedback += 1,
                Some(_) => plain += 1,
                None => {}
            }
        }
        for (count, kind) in [(plain, "plain"), (feedback, "feedback")] {
            if count > 1 {
                out.push(GraphDiagnostic::SlotOverflow {
                    port: id,
                    count,
                    kind: kind.to_string(),
                });
            }
        }
    }
}

/// The ancestor of `node` (or `node` itself) that sits directly in `block`.
fn lift(graph: &FunctionGraph, node: NodeId, block: BlockId) -> Option<NodeId> {
    let mut current = node;
    loop {
        let b = node_block(graph, current)?;
        if b == block {
            return Some(current);
        }
        current = graph.get_block(b)?.owner?;
    }
}

/// Builds the precedence graph with every non-feedback connection lifted to
/// the block it lives in, then reports each strongly connected component.
fn check_cycles(graph: &FunctionGraph, out: &mut Vec<GraphDiagnostic>) {
    let mut dag: DiGraph<NodeId, ()> = DiGraph::new();
    let index: HashMap<NodeId, NodeIndex> = graph
        .nodes()
        .map(|(id, _)| (id, dag.add_node(id)))
        .collect();

    for (_, conn) in graph.connections() {
        if conn.feedback {
            continue;
        }
        let (Some(src), Some(dst)) = (conn.source_port(), conn.destination_port()) else {
            continue;
        };
        let (Some(sp), Some(dp)) = (graph.get_port(src), graph.get_port(dst)) else {
            continue;
        };
        let (Some(a), Some(b)) = (
            lift(graph, sp.node, conn.block),
            lift(graph, dp.node, conn.block),
        ) else {
            continue;
        };
        if let (Some(&ia), Some(&ib)) = (index.get(&a), index.get(&b)) {
            dag.add_edge(ia, ib, ());
        }
    }

    for scc in tarjan_scc(&dag) {
        let looped = match scc.as_slice() {
            [single] => dag.contains_edge(*single, *single),
            _ => true,
        };
        if looped {
            let mut nodes: Vec<NodeId> = scc.iter().map(|i| dag[*i]).collect();
            nodes.sort();
            out.push(GraphDiagnostic::Cycle { nodes });
        }
    }
}

fn check_branches(graph: &FunctionGraph, out: &mut Vec<GraphDiagnostic>) {
    for (id, node) in graph.nodes() {
        if matches!(node.kind, NodeKind::Branch { .. }) && graph.enclosing_loop(node.block).is_none()
        {
            out.push(GraphDiagnostic::BranchOutsideLoop { node: id });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flux_core::kind::BranchKind;
    use flux_core::structural::StructuralForm;
    use flux_core::type_id::TypeId;
    use flux_core::types::{Param, Signature};

    /// n -> a -> b, with b fed back into a.
    fn chain() -> FunctionGraph {
        let mut g = FunctionGraph::new("example.com/p", "f");
        g.set_signature(
            None,
            &Signature {
                params: vec![Param {
                    name: "n".into(),
                    ty: TypeId::INT,
                }],
                results: vec![],
                variadic: false,
            },
        )
        .unwrap();
        let root = g.root_block();
        let a = g.add_node(root, NodeKind::Convert { ty: Some(TypeId::INT) }).unwrap();
        let b = g.add_node(root, NodeKind::Convert { ty: Some(TypeId::INT) }).unwrap();
        let out = |g: &FunctionGraph, n: NodeId| g.get_node(n).unwrap().outputs[0];
        let inp = |g: &FunctionGraph, n: NodeId| g.get_node(n).unwrap().inputs[0];
        let n = out(&g, g.inputs_node());
        g.connect(n, inp(&g, a)).unwrap();
        g.connect(out(&g, a), inp(&g, b)).unwrap();
        g.connect_feedback(out(&g, b), inp(&g, a)).unwrap();
        g
    }

    #[test]
    fn edited_graph_is_valid() {
        let g = chain();
        assert_eq!(validate_graph(&g), vec![]);
        assert!(is_valid(&g));
    }

    #[test]
    fn cycle_is_reported_when_feedback_flag_is_lost() {
        let mut form = StructuralForm::from_graph(&chain());
        for c in &mut form.connections {
            c.feedback = false;
        }
        // Keep the input slot rule intact so only the cycle remains.
        form.connections.remove(0);
        let g = form.into_graph().unwrap();
        let diags = validate_graph(&g);
        assert_eq!(
            diags,
            vec![GraphDiagnostic::Cycle {
                nodes: vec![NodeId(2), NodeId(3)]
            }]
        );
    }

    #[test]
    fn slot_overflow_is_reported() {
        let mut form = StructuralForm::from_graph(&chain());
        for c in &mut form.connections {
            c.feedback = false;
        }
        let g = form.into_graph().unwrap();
        let diags = validate_graph(&g);
        assert!(diags.iter().any(|d| d.tag() == "slot"));
        assert!(diags.iter().any(|d| d.tag() == "cycle"));
    }

    #[test]
    fn branch_outside_loop_is_reported() {
        let mut g = FunctionGraph::new("example.com/p", "f");
        let root = g.root_block();
        let lp = g.add_node(root, NodeKind::Loop).unwrap();
        let body = g.get_node(lp).unwrap().blocks[0];
        g.add_node(
            body,
            NodeKind::Branch {
                kind: BranchKind::Continue,
            },
        )
        .unwrap();
        assert!(is_valid(&g));

        let mut form = StructuralForm::from_graph(&g);
        let branch = form.nodes.len() - 1;
        form.nodes[branch].block = 0;
        let g = form.into_graph().unwrap();
        assert_eq!(
            validate_graph(&g),
            vec![GraphDiagnostic::BranchOutsideLoop {
                node: NodeId(branch as u32)
            }]
        );
    }

    #[test]
    fn dangling_connection_is_reported() {
        let mut g = chain();
        let port = g.get_node(g.inputs_node()).unwrap().outputs[0];
        g.begin_connection(port, flux_core::Point::new(1.0, 1.0)).unwrap();
        assert!(validate_graph(&g).iter().any(|d| d.tag() == "dangling"));
    }
}
