use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::dag::graph::FlowGraph;
use crate::dag::node_info::{NodeInfo, ScheduledNode};
use crate::dag::scheduler_step::SchedulerStep;
use crate::dag::state_manager::{ReadOnlyStateManager, StateManager};
use crate::engine::{NodeStatus, RunSummary};
use crate::types::{NodeId, NodeState};

/// Scheduler holds the immutable flow graph plus mutable per-run state.
///
/// It is responsible for:
/// - computing the ready set (nodes whose deps are all terminal)
/// - marking nodes as succeeded/failed
/// - skipping dependents of failed nodes unless they carry the
///   continuation flag
///
/// It performs no tool-specific work and never retries a failed node.
#[derive(Debug)]
pub struct Scheduler {
    graph: FlowGraph,
    nodes: BTreeMap<NodeId, NodeInfo>,
    started: bool,
}

impl Scheduler {
    pub fn new(graph: FlowGraph) -> Self {
        let nodes = graph
            .nodes()
            .map(|id| (id.clone(), NodeInfo::from_graph(&graph, id)))
            .collect();
        Self {
            graph,
            nodes,
            started: false,
        }
    }

    pub fn graph(&self) -> &FlowGraph {
        &self.graph
    }

    /// `true` once every node is terminal.
    pub fn is_finished(&self) -> bool {
        self.nodes.values().all(|info| info.state.is_terminal())
    }

    pub fn state_of(&self, id: &NodeId) -> Option<NodeState> {
        self.nodes.get(id).map(|info| info.state)
    }

    /// All node states, ordered by node id.
    pub fn states(&self) -> impl Iterator<Item = (&NodeId, NodeState)> {
        self.nodes.iter().map(|(id, info)| (id, info.state))
    }

    /// Snapshot of all node states for reporting.
    pub fn summary(&self, jobname: &str) -> RunSummary {
        RunSummary {
            jobname: jobname.to_string(),
            states: self
                .nodes
                .iter()
                .map(|(id, info)| (id.clone(), info.state))
                .collect(),
        }
    }

    /// Whether `id` may start given the current states of its deps.
    ///
    /// Returns `None` if the node is unknown.
    pub fn deps_satisfied(&self, id: &NodeId) -> Option<bool> {
        let info = self.nodes.get(id)?;
        let mgr = ReadOnlyStateManager::new(&self.nodes);
        Some(mgr.deps_satisfied_for_info(info))
    }

    /// Begin the run: returns the entry nodes, now `Running`.
    pub fn start(&mut self) -> Vec<ScheduledNode> {
        self.step_start().newly_scheduled
    }

    /// Handle completion of a node with a concrete status (production API).
    pub fn handle_completion(&mut self, id: &NodeId, status: NodeStatus) -> Vec<ScheduledNode> {
        self.completion_step_internal(id, status).newly_scheduled
    }

    /// Manual-step variant of `start` that returns a rich [`SchedulerStep`].
    pub fn step_start(&mut self) -> SchedulerStep {
        if self.started {
            warn!(graph = %self.graph.name(), "start called twice; ignoring");
            return SchedulerStep {
                run_finished: self.is_finished(),
                ..SchedulerStep::default()
            };
        }
        self.started = true;
        debug!(graph = %self.graph.name(), nodes = self.nodes.len(), "scheduler: starting run");

        let mut newly_skipped = Vec::new();
        let mut manager = StateManager::new(&self.graph, &mut self.nodes);
        let newly_scheduled = manager.collect_new_ready_nodes(&mut newly_skipped);
        let run_finished = manager.all_nodes_terminal();

        SchedulerStep {
            newly_scheduled,
            newly_skipped,
            run_finished,
        }
    }

    /// Manual-step variant of `handle_completion`.
    pub fn step_completion(&mut self, id: &NodeId, status: NodeStatus) -> SchedulerStep {
        self.completion_step_internal(id, status)
    }

    fn completion_step_internal(&mut self, id: &NodeId, status: NodeStatus) -> SchedulerStep {
        let mut newly_skipped = Vec::new();

        match self.nodes.get_mut(id) {
            Some(info) if info.state == NodeState::Running => match status {
                NodeStatus::Success => {
                    info.state = NodeState::Success;
                    debug!(node = %id, "node completed successfully");
                }
                NodeStatus::Failed => {
                    info.state = NodeState::Failed;
                    warn!(node = %id, "node failed; skipping dependents without continuation flag");
                    let mut manager = StateManager::new(&self.graph, &mut self.nodes);
                    newly_skipped = manager.mark_dependents_skipped(id);
                }
            },
            Some(info) => {
                warn!(
                    node = %id,
                    state = %info.state,
                    "completion for node that is not running; ignoring"
                );
                return SchedulerStep {
                    run_finished: self.is_finished(),
                    ..SchedulerStep::default()
                };
            }
            None => {
                warn!(node = %id, "completion for unknown node; ignoring");
                return SchedulerStep {
                    run_finished: self.is_finished(),
                    ..SchedulerStep::default()
                };
            }
        }

        let mut manager = StateManager::new(&self.graph, &mut self.nodes);
        let newly_scheduled = manager.collect_new_ready_nodes(&mut newly_skipped);
        let run_finished = manager.all_nodes_terminal();

        if run_finished {
            info!(graph = %self.graph.name(), "scheduler: all nodes terminal; run finished");
        }

        SchedulerStep {
            newly_scheduled,
            newly_skipped,
            run_finished,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::NodeSpec;

    fn diamond(continue_join: bool) -> FlowGraph {
        let mut g = FlowGraph::new("diamond");
        g.add_node("a", 0, NodeSpec::new("nop")).unwrap();
        g.add_node("b", 0, NodeSpec::new("nop")).unwrap();
        g.add_node("c", 0, NodeSpec::new("nop")).unwrap();
        g.add_node("d", 0, NodeSpec::new("join").with_continue(continue_join))
            .unwrap();
        g.edge("a", "b").unwrap();
        g.edge("a", "c").unwrap();
        g.edge("b", "d").unwrap();
        g.edge("c", "d").unwrap();
        g
    }

    fn id(step: &str) -> NodeId {
        NodeId::new(step, 0)
    }

    #[test]
    fn join_waits_for_all_branches() {
        let mut s = Scheduler::new(diamond(false));
        let ready = s.start();
        assert_eq!(ready.len(), 1);
        let ready = s.handle_completion(&id("a"), NodeStatus::Success);
        assert_eq!(ready.len(), 2);
        assert!(s.handle_completion(&id("b"), NodeStatus::Success).is_empty());
        let ready = s.handle_completion(&id("c"), NodeStatus::Success);
        assert_eq!(ready[0].id, id("d"));
        assert_eq!(ready[0].inputs.len(), 2);
        let step = s.step_completion(&id("d"), NodeStatus::Success);
        assert!(step.run_finished);
    }

    #[test]
    fn failed_branch_skips_join_without_continuation() {
        let mut s = Scheduler::new(diamond(false));
        s.start();
        s.handle_completion(&id("a"), NodeStatus::Success);
        let step = s.step_completion(&id("b"), NodeStatus::Failed);
        assert_eq!(step.newly_skipped, vec![id("d")]);
        assert_eq!(s.state_of(&id("c")), Some(NodeState::Running));
        let step = s.step_completion(&id("c"), NodeStatus::Success);
        assert!(step.newly_scheduled.is_empty());
        assert!(step.run_finished);
    }

    #[test]
    fn continuation_flag_lets_join_run_after_failure() {
        let mut s = Scheduler::new(diamond(true));
        s.start();
        s.handle_completion(&id("a"), NodeStatus::Success);
        let step = s.step_completion(&id("b"), NodeStatus::Failed);
        assert!(step.newly_skipped.is_empty());
        assert_eq!(s.state_of(&id("d")), Some(NodeState::Pending));
        assert_eq!(s.deps_satisfied(&id("d")), Some(false));
        let ready = s.handle_completion(&id("c"), NodeStatus::Success);
        assert_eq!(ready[0].id, id("d"));
    }

    #[test]
    fn completion_for_non_running_node_is_ignored() {
        let mut s = Scheduler::new(diamond(false));
        s.start();
        let step = s.step_completion(&id("d"), NodeStatus::Success);
        assert!(step.newly_scheduled.is_empty());
        assert_eq!(s.state_of(&id("d")), Some(NodeState::Pending));
    }
}
