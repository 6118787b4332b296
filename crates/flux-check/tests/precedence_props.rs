//! Property tests: random edit sequences never produce an invalid graph,
//! and a connection is refused exactly when it would close a cycle.

use proptest::prelude::*;

use flux_check::validate_graph;
use flux_core::graph::FunctionGraph;
use flux_core::id::{BlockId, NodeId};
use flux_core::kind::NodeKind;
use flux_core::type_id::TypeId;
use flux_core::CoreError;

/// Where a node is placed: the function block or the body of one of two
/// loops.
#[derive(Debug, Clone, Copy)]
enum Place {
    Root,
    Loop(usize),
}

fn place_strategy() -> impl Strategy<Value = Place> {
    prop_oneof![Just(Place::Root), (0usize..2).prop_map(Place::Loop)]
}

fn build(places: &[Place]) -> (FunctionGraph, Vec<NodeId>) {
    let mut g = FunctionGraph::new("example.com/p", "f");
    let root = g.root_block();
    let bodies: Vec<BlockId> = (0..2)
        .map(|_| {
            let lp = g.add_node(root, NodeKind::Loop).unwrap();
            g.get_node(lp).unwrap().blocks[0]
        })
        .collect();
    let nodes = places
        .iter()
        .map(|p| {
            let block = match p {
                Place::Root => root,
                Place::Loop(i) => bodies[*i],
            };
            g.add_node(block, NodeKind::Convert { ty: Some(TypeId::INT) })
                .unwrap()
        })
        .collect();
    (g, nodes)
}

proptest! {
    #[test]
    fn edits_keep_the_graph_valid(
        places in prop::collection::vec(place_strategy(), 2..8),
        edges in prop::collection::vec((0usize..8, 0usize..8, any::<bool>()), 0..24),
    ) {
        let (mut g, nodes) = build(&places);
        for (a, b, feedback) in edges {
            let (a, b) = (nodes[a % nodes.len()], nodes[b % nodes.len()]);
            let src = g.get_node(a).unwrap().outputs[0];
            let dst = g.get_node(b).unwrap().inputs[0];
            let predicted = g.can_connect(src, dst);
            let result = if feedback {
                g.connect_feedback(src, dst)
            } else {
                g.connect(src, dst)
            };
            if !feedback {
                prop_assert_eq!(result.is_ok(), predicted);
                if let Err(err) = result {
                    prop_assert!(
                        matches!(err, CoreError::CycleRejected { .. }),
                        "expected a rejected cycle, got {:?}",
                        err
                    );
                    prop_assert!(g.precedes(b, a));
                }
            }
            prop_assert_eq!(validate_graph(&g), vec![]);
        }
    }

    #[test]
    fn removing_nodes_leaves_no_stale_connections(
        places in prop::collection::vec(place_strategy(), 2..8),
        edges in prop::collection::vec((0usize..8, 0usize..8), 0..16),
        victim in 0usize..8,
    ) {
        let (mut g, nodes) = build(&places);
        for (a, b) in edges {
            let (a, b) = (nodes[a % nodes.len()], nodes[b % nodes.len()]);
            let src = g.get_node(a).unwrap().outputs[0];
            let dst = g.get_node(b).unwrap().inputs[0];
            let _ = g.connect(src, dst);
        }
        let victim = nodes[victim % nodes.len()];
        let ports: Vec<_> = {
            let n = g.get_node(victim).unwrap();
            n.inputs.iter().chain(n.outputs.iter()).copied().collect()
        };
        g.remove_node(victim).unwrap();
        for (_, conn) in g.connections() {
            for p in &ports {
                prop_assert_ne!(conn.source_port(), Some(*p));
                prop_assert_ne!(conn.destination_port(), Some(*p));
            }
        }
        prop_assert_eq!(validate_graph(&g), vec![]);
    }
}
