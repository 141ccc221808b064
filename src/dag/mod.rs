// src/dag/mod.rs

//! Flow graph representation and scheduling.
//!
//! - [`graph`] holds the acyclic flow template and graph composition.
//! - [`node_spec`] is the static per-node configuration.
//! - [`scheduler`] contains the per-run state machine that decides which
//!   nodes are ready and which must be skipped.
//! - [`node_info`] provides per-node state and scheduled node types.
//! - [`scheduler_step`] defines the result type for scheduler steps.
//! - [`state_manager`] manages per-run state transitions.

pub mod graph;
pub mod node_info;
pub mod node_spec;
pub mod scheduler;
pub mod scheduler_step;
pub mod state_manager;

pub use graph::FlowGraph;
pub use node_info::ScheduledNode;
pub use node_spec::NodeSpec;
pub use scheduler::Scheduler;
pub use scheduler_step::SchedulerStep;
