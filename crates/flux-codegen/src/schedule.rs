//! Statement order within one block.
//!
//! Every connection stored in a block joins two nodes of that block once
//! its endpoints are lifted through their enclosing control-flow nodes, so
//! a block's own connection set is exactly the dependency relation between
//! its statements. Sequence connections take part like data connections;
//! feedback connections do not.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use flux_core::{BlockId, FunctionGraph, NodeId, NodeKind};

use crate::error::CodegenError;

/// Orders the statement-producing nodes of `block`. A node follows every
/// node it depends on, directly or through nodes nested inside it; among
/// nodes that are free to go next, the one added to the block first wins.
/// Ports nodes produce no statement and are left out.
pub fn schedule_block(graph: &FunctionGraph, block: BlockId) -> Result<Vec<NodeId>, CodegenError> {
    let b = graph
        .get_block(block)
        .ok_or_else(|| CodegenError::InvalidGraph(format!("unknown block {}", block)))?;

    let members: Vec<NodeId> = b
        .nodes
        .iter()
        .copied()
        .filter(|n| {
            graph
                .get_node(*n)
                .is_some_and(|node| !matches!(node.kind, NodeKind::Ports { .. }))
        })
        .collect();
    let position: HashMap<NodeId, usize> =
        members.iter().enumerate().map(|(i, n)| (*n, i)).collect();

    // Build in-degree counts and successor lists over lifted edges
    let mut in_degree = vec![0usize; members.len()];
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); members.len()];
    for c in &b.conns {
        let Some(conn) = graph.get_connection(*c) else {
            continue;
        };
        if conn.feedback {
            continue;
        }
        let (Some(src), Some(dst)) = (conn.source_port(), conn.destination_port()) else {
            continue;
        };
        let lifted = |port| {
            graph
                .get_port(port)
                .and_then(|p| lift(graph, p.node, block))
                .and_then(|n| position.get(&n).copied())
        };
        let (Some(from), Some(to)) = (lifted(src), lifted(dst)) else {
            continue;
        };
        if from != to {
            successors[from].push(to);
            in_degree[to] += 1;
        }
    }

    // Kahn's algorithm, smallest position first
    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, d)| **d == 0)
        .map(|(i, _)| Reverse(i))
        .collect();
    let mut sorted = Vec::with_capacity(members.len());
    while let Some(Reverse(i)) = ready.pop() {
        sorted.push(members[i]);
        for &next in &successors[i] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.push(Reverse(next));
            }
        }
    }

    if sorted.len() != members.len() {
        return Err(CodegenError::InvalidGraph(format!(
            "cycle detected in block {}",
            block
        )));
    }
    Ok(sorted)
}

/// The node of `block` that is `node` or encloses it.
fn lift(graph: &FunctionGraph, node: NodeId, block: BlockId) -> Option<NodeId> {
    let mut current = node;
    loop {
        let n = graph.get_node(current)?;
        if n.block == block {
            return Some(current);
        }
        current = graph.get_block(n.block)?.owner?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flux_core::{LiteralKind, NodeKind};

    fn sequenced(first_added_runs_first: bool) -> (FunctionGraph, NodeId, NodeId) {
        let mut g = FunctionGraph::new("example.com/app", "f");
        let root = g.root_block();
        let a = g.add_node(root, NodeKind::Len).unwrap();
        let b = g.add_node(root, NodeKind::Len).unwrap();
        let (from, to) = if first_added_runs_first { (a, b) } else { (b, a) };
        let out = g.get_node(from).unwrap().seq_output().unwrap();
        let input = g.get_node(to).unwrap().seq_input().unwrap();
        g.connect(out, input).unwrap();
        (g, a, b)
    }

    #[test]
    fn test_sequence_edge_orders_both_ways() {
        let (g, a, b) = sequenced(true);
        assert_eq!(schedule_block(&g, g.root_block()).unwrap(), vec![a, b]);

        let (g, a, b) = sequenced(false);
        assert_eq!(schedule_block(&g, g.root_block()).unwrap(), vec![b, a]);
    }

    #[test]
    fn test_insertion_order_breaks_ties() {
        let mut g = FunctionGraph::new("example.com/app", "f");
        let root = g.root_block();
        let a = g.add_node(root, NodeKind::Len).unwrap();
        let b = g.add_node(root, NodeKind::If).unwrap();
        let c = g.add_node(root, NodeKind::Len).unwrap();
        assert_eq!(schedule_block(&g, root).unwrap(), vec![a, b, c]);
    }

    #[test]
    fn test_nested_consumer_lifts_to_its_control_node() {
        let mut g = FunctionGraph::new("example.com/app", "f");
        let root = g.root_block();
        let cond = g.add_node(root, NodeKind::If).unwrap();
        let then = g.get_node(cond).unwrap().blocks[0];
        let len = g.add_node(then, NodeKind::Len).unwrap();
        let lit = g
            .add_node(
                root,
                NodeKind::Literal {
                    kind: LiteralKind::String,
                    text: "abc".into(),
                },
            )
            .unwrap();
        let out = g.get_node(lit).unwrap().outputs[0];
        let x = g.get_node(len).unwrap().data_inputs()[0];
        g.connect(out, x).unwrap();

        assert_eq!(schedule_block(&g, root).unwrap(), vec![lit, cond]);
        assert_eq!(schedule_block(&g, then).unwrap(), vec![len]);
    }

    #[test]
    fn test_unknown_block_is_invalid() {
        let g = FunctionGraph::new("example.com/app", "f");
        let err = schedule_block(&g, BlockId(99)).unwrap_err();
        assert!(matches!(err, CodegenError::InvalidGraph(_)));
    }
}
