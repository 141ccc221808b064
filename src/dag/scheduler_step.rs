// src/dag/scheduler_step.rs

//! Step-by-step execution result types for the scheduler.

use crate::dag::node_info::ScheduledNode;
use crate::types::NodeId;

/// Structured result of a single scheduler "step".
///
/// Useful for tests that want to manually step the graph and make
/// assertions about what changed.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStep {
    /// Nodes that became ready to run as a result of this step.
    pub newly_scheduled: Vec<ScheduledNode>,
    /// Nodes newly marked Skipped because of an upstream failure.
    pub newly_skipped: Vec<NodeId>,
    /// Whether every node is now terminal.
    pub run_finished: bool,
}
