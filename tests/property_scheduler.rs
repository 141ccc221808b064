// tests/property_scheduler.rs

use std::collections::{BTreeMap, BTreeSet, HashSet};

use proptest::prelude::*;

use flowdag::dag::{FlowGraph, NodeSpec, Scheduler};
use flowdag::engine::NodeStatus;
use flowdag::errors::FlowError;
use flowdag::types::{NodeId, NodeState};

fn step(i: usize) -> String {
    format!("n{i}")
}

// Strategy to generate a valid flow graph.
// We ensure acyclicity by only allowing node N to depend on nodes 0..N-1.
fn graph_strategy(max_nodes: usize) -> impl Strategy<Value = FlowGraph> {
    (1..=max_nodes).prop_flat_map(|num_nodes| {
        let deps_strat = proptest::collection::vec(
            proptest::collection::vec(any::<usize>(), 0..3),
            num_nodes,
        );
        let continue_strat = proptest::collection::vec(proptest::bool::weighted(0.2), num_nodes);

        (deps_strat, continue_strat).prop_map(move |(raw_deps, continues)| {
            let mut graph = FlowGraph::new("prop");
            for (i, cont) in continues.iter().enumerate() {
                let spec = NodeSpec::shell(format!("echo {i}")).with_continue(*cont);
                graph.add_node(&step(i), 0, spec).unwrap();
            }
            for (i, potential) in raw_deps.into_iter().enumerate() {
                if i == 0 {
                    continue;
                }
                let deps: BTreeSet<usize> = potential.into_iter().map(|d| d % i).collect();
                for d in deps {
                    graph
                        .add_edge(&NodeId::new(step(d), 0), &NodeId::new(step(i), 0))
                        .unwrap();
                }
            }
            graph
        })
    })
}

/// Run the scheduler to completion, failing the nodes in `failing`.
/// Returns final states and the order nodes were started in.
fn simulate(graph: FlowGraph, failing: &HashSet<NodeId>) -> (BTreeMap<NodeId, NodeState>, Vec<NodeId>) {
    let mut scheduler = Scheduler::new(graph);
    let mut executing: Vec<NodeId> = scheduler.start().into_iter().map(|n| n.id).collect();
    let mut started = executing.clone();

    let mut steps = 0;
    while let Some(id) = executing.pop() {
        steps += 1;
        assert!(steps < 10_000, "scheduler did not converge");
        let status = if failing.contains(&id) {
            NodeStatus::Failed
        } else {
            NodeStatus::Success
        };
        for next in scheduler.handle_completion(&id, status) {
            started.push(next.id.clone());
            executing.push(next.id);
        }
    }

    assert!(scheduler.is_finished());
    let states = scheduler.states().map(|(id, s)| (id.clone(), s)).collect();
    (states, started)
}

proptest! {
    #[test]
    fn built_graphs_have_a_topological_order(graph in graph_strategy(12)) {
        let order = graph.topological_order().unwrap();
        prop_assert_eq!(order.len(), graph.len());
        let position: BTreeMap<&NodeId, usize> =
            order.iter().enumerate().map(|(i, id)| (id, i)).collect();
        for (tail, head) in graph.edges() {
            prop_assert!(position[&tail] < position[&head]);
        }
    }

    #[test]
    fn back_edges_are_rejected(graph in graph_strategy(10), a in any::<usize>(), b in any::<usize>()) {
        let n = graph.len();
        let (lo, hi) = ((a % n).min(b % n), (a % n).max(b % n));
        if lo == hi {
            return Ok(());
        }
        let mut graph = graph;
        let tail = NodeId::new(step(lo), 0);
        let head = NodeId::new(step(hi), 0);
        let reachable = graph.add_edge(&tail, &head).is_ok();
        prop_assert!(reachable);
        let result = graph.add_edge(&head, &tail);
        prop_assert!(matches!(result, Err(FlowError::Cycle(_))));
        prop_assert!(graph.topological_order().is_ok());
    }

    #[test]
    fn every_run_terminates_with_consistent_states(
        graph in graph_strategy(12),
        failing_idx in proptest::collection::vec(0..12usize, 0..4),
    ) {
        let failing: HashSet<NodeId> = failing_idx
            .iter()
            .filter(|&&i| i < graph.len())
            .map(|&i| NodeId::new(step(i), 0))
            .collect();
        let (states, started) = simulate(graph.clone(), &failing);

        // Each node starts at most once, and only after all its deps.
        let unique: HashSet<&NodeId> = started.iter().collect();
        prop_assert_eq!(unique.len(), started.len());
        let position: BTreeMap<&NodeId, usize> =
            started.iter().enumerate().map(|(i, id)| (id, i)).collect();

        for id in graph.nodes() {
            let state = states[id];
            prop_assert!(state.is_terminal());
            let deps = graph.dependencies_of(id);
            let cont = graph.spec(id).unwrap().continue_on_failure;
            let blocked = deps.iter().any(|d| states[d].blocks_downstream());

            match state {
                NodeState::Skipped => {
                    prop_assert!(blocked && !cont, "{} skipped without cause", id);
                    prop_assert!(!position.contains_key(id));
                }
                _ => {
                    prop_assert!(!blocked || cont, "{} ran after a failed dependency", id);
                    for d in deps {
                        prop_assert!(position[d] < position[id]);
                    }
                }
            }
            if failing.contains(id) && state != NodeState::Skipped {
                prop_assert_eq!(state, NodeState::Failed);
            }
        }
    }
}
