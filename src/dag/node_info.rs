// src/dag/node_info.rs

//! Per-node scheduling state and the scheduled-node description handed to
//! dispatchers.

use crate::dag::graph::FlowGraph;
use crate::dag::node_spec::NodeSpec;
use crate::types::{NodeId, NodeState};

/// Static node information derived from the graph, plus per-run state.
#[derive(Debug, Clone)]
pub struct NodeInfo {
    pub id: NodeId,
    /// Direct dependencies (edge tails).
    pub deps: Vec<NodeId>,
    pub continue_on_failure: bool,
    pub state: NodeState,
}

impl NodeInfo {
    pub fn from_graph(graph: &FlowGraph, id: &NodeId) -> Self {
        let continue_on_failure = graph
            .spec(id)
            .map(|spec| spec.continue_on_failure)
            .unwrap_or(false);
        Self {
            id: id.clone(),
            deps: graph.dependencies_of(id).to_vec(),
            continue_on_failure,
            state: NodeState::Pending,
        }
    }
}

/// Description of a node that the scheduler wants a dispatcher to run now.
#[derive(Debug, Clone)]
pub struct ScheduledNode {
    pub id: NodeId,
    /// Snapshot of the node's spec at scheduling time.
    pub spec: NodeSpec,
    /// Upstream nodes; the executor consults their records (e.g. selectors).
    pub inputs: Vec<NodeId>,
}

impl ScheduledNode {
    pub fn from_node_info(info: &NodeInfo, graph: &FlowGraph) -> Self {
        Self {
            id: info.id.clone(),
            spec: graph.spec(&info.id).cloned().unwrap_or_default(),
            inputs: info.deps.clone(),
        }
    }
}
