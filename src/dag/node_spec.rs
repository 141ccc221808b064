// src/dag/node_spec.rs

//! Static per-node configuration carried by a [`FlowGraph`](super::FlowGraph).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// What a node runs and how it reacts to upstream failure.
///
/// Specs are plain values: embedding a template or starting an optimization
/// trial clones them, so overrides on one copy never leak into another.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Adapter identifier resolved through the
    /// [`AdapterRegistry`](crate::exec::AdapterRegistry).
    pub tool: String,

    /// Optional task name within the tool (e.g. `"place"` for a P&R tool).
    #[serde(default)]
    pub task: Option<String>,

    /// Extra command-line arguments passed to the tool.
    #[serde(default)]
    pub args: Vec<String>,

    /// String variables. Optimization trials write their parameter values
    /// here.
    #[serde(default)]
    pub vars: BTreeMap<String, String>,

    /// Continuation flag: run even if an upstream node failed or was skipped.
    #[serde(default, rename = "continue")]
    pub continue_on_failure: bool,

    /// Metric weights used by the `minimum`/`maximum` selectors.
    #[serde(default)]
    pub weights: BTreeMap<String, f64>,
}

impl NodeSpec {
    pub fn new(tool: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            ..Self::default()
        }
    }

    /// Shell node running `cmd`.
    pub fn shell(cmd: impl Into<String>) -> Self {
        let mut spec = Self::new("shell");
        spec.vars.insert("cmd".to_string(), cmd.into());
        spec
    }

    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    pub fn with_continue(mut self, flag: bool) -> Self {
        self.continue_on_failure = flag;
        self
    }

    pub fn with_weight(mut self, metric: impl Into<String>, weight: f64) -> Self {
        self.weights.insert(metric.into(), weight);
        self
    }
}
