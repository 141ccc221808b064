// src/engine/mod.rs

//! Orchestration engine for flowdag.
//!
//! The pure state machine lives in [`crate::dag::Scheduler`]; this module is
//! the async shell around it. [`runtime::Runtime`] hands ready nodes to a
//! [`crate::dispatch::Dispatcher`], waits for their outcomes on background
//! tasks and feeds completions back through a single event channel, so every
//! scheduling decision is taken on one control loop.

use std::collections::BTreeMap;
use std::fmt;

use crate::types::{NodeId, NodeState};

/// Outcome of a node execution as seen by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    Success,
    Failed,
}

impl NodeStatus {
    pub fn as_state(self) -> NodeState {
        match self {
            NodeStatus::Success => NodeState::Success,
            NodeStatus::Failed => NodeState::Failed,
        }
    }
}

/// A node finished (or could not be dispatched at all).
#[derive(Debug, Clone)]
pub struct NodeCompletion {
    pub node: NodeId,
    pub status: NodeStatus,
    pub error: Option<String>,
}

/// Events flowing into the runtime from background wait tasks.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    NodeCompleted(NodeCompletion),
}

/// Final node states of one run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub jobname: String,
    pub states: BTreeMap<NodeId, NodeState>,
}

impl RunSummary {
    pub fn nodes_in(&self, state: NodeState) -> Vec<NodeId> {
        self.states
            .iter()
            .filter(|(_, s)| **s == state)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn count(&self, state: NodeState) -> usize {
        self.states.values().filter(|s| **s == state).count()
    }

    /// No node failed or was skipped.
    pub fn is_success(&self) -> bool {
        self.states.values().all(|s| *s == NodeState::Success)
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} succeeded, {} failed, {} skipped",
            self.jobname,
            self.count(NodeState::Success),
            self.count(NodeState::Failed),
            self.count(NodeState::Skipped),
        )
    }
}

pub mod runtime;

pub use runtime::{Runtime, run_flow};
