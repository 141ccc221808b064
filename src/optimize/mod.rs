// src/optimize/mod.rs

//! Parameter search over flow runs.
//!
//! - [`params`] validates parameter and goal descriptors.
//! - [`oracle`] is the suggest/complete interface plus Pareto helpers.
//! - [`random`] is the built-in oracle (`search` feature).
//! - [`controller`] runs the merged-graph rounds.

pub mod controller;
pub mod oracle;
pub mod params;
#[cfg(feature = "search")]
pub mod random;

pub use controller::{
    OptimizationController, OptimizationReport, OptimizationRequest, Trial, TrialResult,
    build_merged_graph, round_count,
};
pub use oracle::{
    Assignment, Completion, Measurement, Oracle, OracleTrial, Suggestion, default_oracle,
    search_available,
};
pub use params::{Direction, Domain, Goal, GoalSpec, ParamValue, Parameter, ParameterSpec};
#[cfg(feature = "search")]
pub use random::RandomSearch;
