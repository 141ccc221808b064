// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::dag::{FlowGraph, NodeSpec};
use crate::dispatch::ClusterOptions;
use crate::optimize::{GoalSpec, OptimizationRequest, ParameterSpec};
use crate::types::DispatcherKind;

/// Flow file as read from TOML, before validation.
///
/// ```toml
/// [option]
/// design = "gcd"
/// dispatcher = "local"
///
/// [[node]]
/// step = "syn"
/// tool = "shell"
/// vars = { cmd = "yosys -c syn.tcl" }
///
/// [[node]]
/// step = "place"
/// tool = "shell"
/// after = ["syn"]
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct RawFlowConfig {
    #[serde(default)]
    pub option: OptionSection,

    /// All nodes from `[[node]]`.
    #[serde(default)]
    pub node: Vec<NodeConfig>,

    #[serde(default)]
    pub optimize: Option<OptimizeSection>,
}

/// `[option]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct OptionSection {
    #[serde(default = "default_design")]
    pub design: String,

    #[serde(default = "default_jobname")]
    pub jobname: String,

    /// Root of all job directories.
    #[serde(default = "default_builddir")]
    pub builddir: PathBuf,

    /// `"local"` (default) or `"cluster"`.
    #[serde(default)]
    pub dispatcher: DispatcherKind,

    /// Record blake3 digests of node outputs.
    #[serde(default)]
    pub hash: bool,

    /// `[option.scheduler]`, used by the cluster dispatcher.
    #[serde(default)]
    pub scheduler: ClusterOptions,
}

fn default_design() -> String {
    "design".to_string()
}

fn default_jobname() -> String {
    "job0".to_string()
}

fn default_builddir() -> PathBuf {
    PathBuf::from("build")
}

impl Default for OptionSection {
    fn default() -> Self {
        Self {
            design: default_design(),
            jobname: default_jobname(),
            builddir: default_builddir(),
            dispatcher: DispatcherKind::default(),
            hash: false,
            scheduler: ClusterOptions::default(),
        }
    }
}

fn default_tool() -> String {
    "shell".to_string()
}

/// One `[[node]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    pub step: String,

    #[serde(default)]
    pub index: u32,

    /// Adapter identifier (`shell` if omitted).
    #[serde(default = "default_tool")]
    pub tool: String,

    #[serde(default)]
    pub task: Option<String>,

    /// Upstream nodes as `"step"` (index 0) or `"step:index"`.
    #[serde(default)]
    pub after: Vec<String>,

    /// Run even if an upstream node failed.
    #[serde(default, rename = "continue")]
    pub continue_on_failure: bool,

    #[serde(default)]
    pub vars: BTreeMap<String, String>,

    #[serde(default)]
    pub weights: BTreeMap<String, f64>,

    #[serde(default)]
    pub args: Vec<String>,
}

impl NodeConfig {
    pub fn spec(&self) -> NodeSpec {
        NodeSpec {
            tool: self.tool.clone(),
            task: self.task.clone(),
            args: self.args.clone(),
            vars: self.vars.clone(),
            continue_on_failure: self.continue_on_failure,
            weights: self.weights.clone(),
        }
    }
}

/// `[optimize]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OptimizeSection {
    #[serde(default)]
    pub experiments: Option<usize>,

    #[serde(default)]
    pub parallel: Option<usize>,

    /// Measurement nodes as `"step"` or `"step:index"`.
    #[serde(default)]
    pub measure: Vec<String>,

    #[serde(default)]
    pub seed: Option<u64>,

    #[serde(default)]
    pub parameter: Vec<ParameterSpec>,

    #[serde(default)]
    pub goal: Vec<GoalSpec>,
}

/// A validated flow file: options, the flow graph and an optional
/// optimization request.
#[derive(Debug, Clone)]
pub struct FlowConfig {
    pub option: OptionSection,
    graph: FlowGraph,
    optimize: Option<OptimizationRequest>,
}

impl FlowConfig {
    /// Construct without validation. Use `FlowConfig::try_from(raw)`
    /// instead outside of the validator.
    pub(crate) fn new_unchecked(
        option: OptionSection,
        graph: FlowGraph,
        optimize: Option<OptimizationRequest>,
    ) -> Self {
        Self {
            option,
            graph,
            optimize,
        }
    }

    pub fn graph(&self) -> &FlowGraph {
        &self.graph
    }

    /// Fresh copy of the flow graph for one run.
    pub fn build_graph(&self) -> FlowGraph {
        self.graph.clone()
    }

    pub fn optimize(&self) -> Option<&OptimizationRequest> {
        self.optimize.as_ref()
    }
}
