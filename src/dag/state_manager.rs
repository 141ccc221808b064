// src/dag/state_manager.rs

//! Per-run state transitions for nodes in the scheduler.

use std::collections::{BTreeMap, HashSet};

use tracing::{debug, info, warn};

use crate::dag::graph::FlowGraph;
use crate::dag::node_info::{NodeInfo, ScheduledNode};
use crate::types::{NodeId, NodeState};

/// Manages per-run state transitions for nodes.
pub struct StateManager<'a> {
    graph: &'a FlowGraph,
    nodes: &'a mut BTreeMap<NodeId, NodeInfo>,
}

impl<'a> StateManager<'a> {
    pub fn new(graph: &'a FlowGraph, nodes: &'a mut BTreeMap<NodeId, NodeInfo>) -> Self {
        Self { graph, nodes }
    }

    /// Mark every transitive dependent of a failed node as `Skipped`.
    ///
    /// Traversal stops at dependents carrying the continuation flag: they
    /// stay `Pending` and run once all their deps are terminal. Returns the
    /// newly skipped nodes (excluding the failed root).
    pub fn mark_dependents_skipped(&mut self, failed: &NodeId) -> Vec<NodeId> {
        let mut stack: Vec<NodeId> = self.graph.dependents_of(failed).to_vec();
        let mut visited: HashSet<NodeId> = HashSet::new();
        let mut newly_skipped = Vec::new();

        while let Some(id) = stack.pop() {
            if !visited.insert(id.clone()) {
                continue;
            }
            let Some(info) = self.nodes.get_mut(&id) else {
                warn!(node = %id, "node in graph not present in scheduler map");
                continue;
            };

            match info.state {
                NodeState::Pending if !info.continue_on_failure => {
                    info.state = NodeState::Skipped;
                    debug!(node = %id, upstream = %failed, "skipping node due to upstream failure");
                    newly_skipped.push(id.clone());
                    stack.extend(self.graph.dependents_of(&id).iter().cloned());
                }
                NodeState::Pending => {
                    debug!(
                        node = %id,
                        upstream = %failed,
                        "continuation flag set; node stays pending despite upstream failure"
                    );
                }
                // Running or terminal nodes are never rewritten.
                _ => {}
            }
        }

        newly_skipped
    }

    /// Whether a pending node may start: every dependency is terminal and,
    /// unless the continuation flag is set, none of them failed or was
    /// skipped.
    pub fn deps_satisfied_for_info(&self, info: &NodeInfo) -> bool {
        ReadOnlyStateManager::new(self.nodes).deps_satisfied_for_info(info)
    }

    /// Collect `Pending` nodes whose dependencies are all terminal.
    ///
    /// Nodes with a blocking dependency and no continuation flag become
    /// `Skipped` (reported through `skipped`); the rest are marked `Running`
    /// and returned. Repeats until no further node changes, since a skip can
    /// make more nodes decidable.
    pub fn collect_new_ready_nodes(&mut self, skipped: &mut Vec<NodeId>) -> Vec<ScheduledNode> {
        let mut ready = Vec::new();

        loop {
            // Decide first, then mutate to avoid borrowing issues.
            let candidates: Vec<(NodeId, bool)> = {
                let ro = ReadOnlyStateManager::new(self.nodes);
                self.nodes
                    .values()
                    .filter(|info| info.state == NodeState::Pending && ro.deps_terminal(info))
                    .map(|info| (info.id.clone(), ro.deps_satisfied_for_info(info)))
                    .collect()
            };

            if candidates.is_empty() {
                break;
            }

            for (id, runnable) in candidates {
                let Some(info) = self.nodes.get_mut(&id) else {
                    continue;
                };
                if runnable {
                    info!(node = %id, "dependencies terminal; scheduling node");
                    info.state = NodeState::Running;
                    ready.push(ScheduledNode::from_node_info(info, self.graph));
                } else {
                    debug!(node = %id, "upstream failure without continuation flag; skipping");
                    info.state = NodeState::Skipped;
                    skipped.push(id);
                }
            }
        }

        ready
    }

    /// Check if all nodes are in a terminal state.
    pub fn all_nodes_terminal(&self) -> bool {
        self.nodes.values().all(|info| info.state.is_terminal())
    }
}

/// A read-only view used when only shared access to the node map is
/// available (e.g. in `Scheduler::deps_satisfied`).
pub struct ReadOnlyStateManager<'a> {
    nodes: &'a BTreeMap<NodeId, NodeInfo>,
}

impl<'a> ReadOnlyStateManager<'a> {
    pub fn new(nodes: &'a BTreeMap<NodeId, NodeInfo>) -> Self {
        Self { nodes }
    }

    fn dep_state(&self, info: &NodeInfo, dep: &NodeId) -> Option<NodeState> {
        match self.nodes.get(dep) {
            Some(d) => Some(d.state),
            None => {
                warn!(node = %info.id, dep = %dep, "dependency missing from node map");
                None
            }
        }
    }

    /// Every dependency has reached a terminal state.
    pub fn deps_terminal(&self, info: &NodeInfo) -> bool {
        info.deps.iter().all(|dep| {
            self.dep_state(info, dep)
                .map(NodeState::is_terminal)
                .unwrap_or(false)
        })
    }

    /// Dependencies are terminal and allow this node to run.
    pub fn deps_satisfied_for_info(&self, info: &NodeInfo) -> bool {
        if !self.deps_terminal(info) {
            return false;
        }
        if info.continue_on_failure {
            return true;
        }
        info.deps.iter().all(|dep| {
            self.dep_state(info, dep)
                .map(|s| !s.blocks_downstream())
                .unwrap_or(false)
        })
    }
}
