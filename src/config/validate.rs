// src/config/validate.rs

use std::collections::{BTreeMap, BTreeSet};

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{FlowConfig, NodeConfig, OptimizeSection, OptionSection, RawFlowConfig};
use crate::dag::FlowGraph;
use crate::errors::{FlowError, Result};
use crate::optimize::{Goal, OptimizationRequest, Parameter};
use crate::types::{DispatcherKind, NodeId};

impl TryFrom<RawFlowConfig> for FlowConfig {
    type Error = FlowError;

    fn try_from(raw: RawFlowConfig) -> std::result::Result<Self, Self::Error> {
        validate_config(&raw)?;
        let graph = build_graph(&raw.option.design, &raw.node)?;
        let optimize = raw
            .optimize
            .map(|section| optimization_request(section, &graph))
            .transpose()?;
        Ok(FlowConfig::new_unchecked(raw.option, graph, optimize))
    }
}

/// Structural checks that do not need a built graph.
pub fn validate_config(cfg: &RawFlowConfig) -> Result<()> {
    ensure_has_nodes(cfg)?;
    validate_options(&cfg.option)?;
    validate_node_references(&cfg.node)?;
    validate_dag(&cfg.node)?;
    Ok(())
}

fn ensure_has_nodes(cfg: &RawFlowConfig) -> Result<()> {
    if cfg.node.is_empty() {
        return Err(FlowError::ConfigError(
            "flow must contain at least one [[node]] entry".to_string(),
        ));
    }
    Ok(())
}

fn validate_options(option: &OptionSection) -> Result<()> {
    for (name, value) in [("design", &option.design), ("jobname", &option.jobname)] {
        if value.trim().is_empty() {
            return Err(FlowError::ConfigError(format!("[option].{name} must not be empty")));
        }
        if value.contains(['/', '\\']) {
            return Err(FlowError::ConfigError(format!(
                "[option].{name} must not contain path separators (got '{value}')"
            )));
        }
    }

    if option.dispatcher == DispatcherKind::Cluster {
        if option.scheduler.submit.trim().is_empty() {
            return Err(FlowError::ConfigError(
                "[option.scheduler].submit must not be empty".to_string(),
            ));
        }
        if option.scheduler.poll_interval_ms == 0 {
            return Err(FlowError::ConfigError(
                "[option.scheduler].poll_interval_ms must be >= 1 (got 0)".to_string(),
            ));
        }
    }
    Ok(())
}

fn node_id(node: &NodeConfig) -> NodeId {
    NodeId::new(node.step.as_str(), node.index)
}

fn parse_ref(node: &NodeConfig, reference: &str) -> Result<NodeId> {
    reference.parse::<NodeId>().map_err(|e| {
        FlowError::ConfigError(format!("node '{}' has invalid `after` entry: {e}", node_id(node)))
    })
}

fn validate_node_references(nodes: &[NodeConfig]) -> Result<()> {
    let mut declared = BTreeSet::new();
    let mut names = BTreeMap::new();
    for node in nodes {
        let id = node_id(node);
        if !declared.insert(id.clone()) {
            return Err(FlowError::ConfigError(format!(
                "node '{id}' is declared more than once"
            )));
        }
        // Script and ticket files are named `<step><index>`.
        if let Some(other) = names.insert(id.to_string(), id.clone()) {
            return Err(FlowError::ConfigError(format!(
                "nodes (step '{}', index {}) and (step '{}', index {}) both map to the name '{id}'",
                other.step, other.index, id.step, id.index
            )));
        }
    }

    for node in nodes {
        let id = node_id(node);
        for reference in &node.after {
            let dep = parse_ref(node, reference)?;
            if !declared.contains(&dep) {
                return Err(FlowError::ConfigError(format!(
                    "node '{id}' has unknown dependency '{reference}' in `after`"
                )));
            }
            if dep == id {
                return Err(FlowError::ConfigError(format!(
                    "node '{id}' cannot depend on itself in `after`"
                )));
            }
        }
    }
    Ok(())
}

fn validate_dag(nodes: &[NodeConfig]) -> Result<()> {
    // Edge direction: dep -> node.
    let ids: Vec<NodeId> = nodes.iter().map(node_id).collect();
    let mut deps = Vec::new();
    for node in nodes {
        for reference in &node.after {
            deps.push((parse_ref(node, reference)?, node_id(node)));
        }
    }

    let mut graph: DiGraphMap<&NodeId, ()> = DiGraphMap::new();
    for id in &ids {
        graph.add_node(id);
    }
    for (dep, id) in &deps {
        graph.add_edge(dep, id, ());
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(FlowError::Cycle(format!(
            "cycle detected in flow involving node '{}'",
            cycle.node_id()
        ))),
    }
}

fn build_graph(name: &str, nodes: &[NodeConfig]) -> Result<FlowGraph> {
    let mut graph = FlowGraph::new(name);
    for node in nodes {
        graph.add_node(&node.step, node.index, node.spec())?;
    }
    for node in nodes {
        let id = node_id(node);
        for reference in &node.after {
            graph.add_edge(&parse_ref(node, reference)?, &id)?;
        }
    }
    Ok(graph)
}

fn optimization_request(section: OptimizeSection, graph: &FlowGraph) -> Result<OptimizationRequest> {
    let parameters = section
        .parameter
        .into_iter()
        .map(Parameter::try_from)
        .collect::<Result<Vec<_>>>()?;
    let goals = section
        .goal
        .into_iter()
        .map(Goal::try_from)
        .collect::<Result<Vec<_>>>()?;

    if parameters.is_empty() {
        return Err(FlowError::validation("[optimize] needs at least one [[optimize.parameter]]"));
    }
    if goals.is_empty() {
        return Err(FlowError::validation("[optimize] needs at least one [[optimize.goal]]"));
    }
    if section.parallel == Some(0) {
        return Err(FlowError::validation("[optimize].parallel must be >= 1 (got 0)"));
    }
    if section.experiments == Some(0) {
        return Err(FlowError::validation("[optimize].experiments must be >= 1 (got 0)"));
    }

    let mut measure = Vec::with_capacity(section.measure.len());
    for reference in &section.measure {
        let id = reference.parse::<NodeId>().map_err(|e| {
            FlowError::ConfigError(format!("invalid [optimize].measure entry: {e}"))
        })?;
        if !graph.contains(&id) {
            return Err(FlowError::ConfigError(format!(
                "[optimize].measure references unknown node '{reference}'"
            )));
        }
        measure.push(id);
    }

    for param in &parameters {
        if let Some(step) = &param.step {
            if !graph.nodes().any(|id| &id.step == step) {
                return Err(FlowError::ConfigError(format!(
                    "parameter '{}' targets unknown step '{step}'",
                    param.key
                )));
            }
        }
    }

    Ok(OptimizationRequest {
        parameters,
        goals,
        experiments: section.experiments,
        parallel: section.parallel,
        measure,
        seed: section.seed,
    })
}
