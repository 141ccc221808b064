#![allow(dead_code)]

use std::collections::BTreeMap;

use flowdag::config::{FlowConfig, NodeConfig, OptimizeSection, OptionSection, RawFlowConfig};
use flowdag::dag::{FlowGraph, NodeSpec};
use flowdag::optimize::{GoalSpec, ParameterSpec};
use flowdag::types::NodeId;

/// Chain `steps[0] -> steps[1] -> ...`, every node an `echo <step>` shell node.
pub fn linear_flow(name: &str, steps: &[&str]) -> FlowGraph {
    let mut graph = FlowGraph::new(name);
    let mut previous: Option<NodeId> = None;
    for step in steps {
        let id = graph
            .add_node(step, 0, NodeSpec::shell(format!("echo {step}")))
            .expect("valid step name");
        if let Some(prev) = &previous {
            graph.add_edge(prev, &id).expect("chain is acyclic");
        }
        previous = Some(id);
    }
    graph
}

/// The usual physical design chain.
pub fn physical_flow() -> FlowGraph {
    linear_flow("asic", &["import", "syn", "place", "cts", "route", "export"])
}

/// Builder for `FlowConfig` to simplify test setup.
pub struct FlowFileBuilder {
    config: RawFlowConfig,
}

impl FlowFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawFlowConfig {
                option: OptionSection::default(),
                node: Vec::new(),
                optimize: None,
            },
        }
    }

    pub fn design(mut self, design: &str) -> Self {
        self.config.option.design = design.to_string();
        self
    }

    pub fn jobname(mut self, jobname: &str) -> Self {
        self.config.option.jobname = jobname.to_string();
        self
    }

    pub fn builddir(mut self, dir: impl Into<std::path::PathBuf>) -> Self {
        self.config.option.builddir = dir.into();
        self
    }

    pub fn hash(mut self, val: bool) -> Self {
        self.config.option.hash = val;
        self
    }

    pub fn with_node(mut self, node: NodeConfig) -> Self {
        self.config.node.push(node);
        self
    }

    pub fn with_parameter(mut self, param: ParameterSpec) -> Self {
        self.optimize_section().parameter.push(param);
        self
    }

    pub fn with_goal(mut self, key: &str, target: &str) -> Self {
        self.optimize_section().goal.push(GoalSpec::new(key, target));
        self
    }

    pub fn experiments(mut self, n: usize) -> Self {
        self.optimize_section().experiments = Some(n);
        self
    }

    pub fn parallel(mut self, n: usize) -> Self {
        self.optimize_section().parallel = Some(n);
        self
    }

    pub fn measure(mut self, node: &str) -> Self {
        self.optimize_section().measure.push(node.to_string());
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.optimize_section().seed = Some(seed);
        self
    }

    fn optimize_section(&mut self) -> &mut OptimizeSection {
        self.config.optimize.get_or_insert_with(OptimizeSection::default)
    }

    pub fn raw(self) -> RawFlowConfig {
        self.config
    }

    pub fn build(self) -> FlowConfig {
        FlowConfig::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for FlowFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `NodeConfig`.
pub struct NodeConfigBuilder {
    node: NodeConfig,
}

impl NodeConfigBuilder {
    /// Shell node running `cmd`.
    pub fn new(step: &str, cmd: &str) -> Self {
        let mut vars = BTreeMap::new();
        vars.insert("cmd".to_string(), cmd.to_string());
        Self {
            node: NodeConfig {
                step: step.to_string(),
                index: 0,
                tool: "shell".to_string(),
                task: None,
                after: vec![],
                continue_on_failure: false,
                vars,
                weights: BTreeMap::new(),
                args: vec![],
            },
        }
    }

    /// Node using a non-shell tool, without variables.
    pub fn tool(step: &str, tool: &str) -> Self {
        let mut builder = Self::new(step, "");
        builder.node.vars.clear();
        builder.node.tool = tool.to_string();
        builder
    }

    pub fn index(mut self, index: u32) -> Self {
        self.node.index = index;
        self
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.node.after.push(dep.to_string());
        self
    }

    pub fn continue_on_failure(mut self, val: bool) -> Self {
        self.node.continue_on_failure = val;
        self
    }

    pub fn var(mut self, key: &str, value: &str) -> Self {
        self.node.vars.insert(key.to_string(), value.to_string());
        self
    }

    pub fn weight(mut self, metric: &str, weight: f64) -> Self {
        self.node.weights.insert(metric.to_string(), weight);
        self
    }

    pub fn arg(mut self, arg: &str) -> Self {
        self.node.args.push(arg.to_string());
        self
    }

    pub fn build(self) -> NodeConfig {
        self.node
    }
}
