// src/dag/graph.rs

use std::collections::{BTreeMap, BTreeSet};

use petgraph::algo::{has_path_connecting, toposort};
use petgraph::graphmap::DiGraphMap;
use tracing::debug;

use crate::dag::node_spec::NodeSpec;
use crate::errors::{FlowError, Result};
use crate::types::{INDEX_SEPARATOR, INSTANCE_SEPARATOR, NodeId};

/// Internal node structure: the node spec plus immediate deps and dependents.
#[derive(Debug, Clone)]
struct GraphNode {
    spec: NodeSpec,
    /// Direct dependencies (edge tails).
    deps: Vec<NodeId>,
    /// Direct dependents (edge heads).
    dependents: Vec<NodeId>,
}

/// Named flow template: nodes keyed by `(step, index)` plus edges.
///
/// Acyclicity is enforced on every [`add_edge`](Self::add_edge), so a
/// `FlowGraph` value always admits a topological order.
#[derive(Debug, Clone)]
pub struct FlowGraph {
    name: String,
    nodes: BTreeMap<NodeId, GraphNode>,
    /// Instance prefixes created by [`embed`](Self::embed).
    instances: BTreeSet<String>,
}

impl FlowGraph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: BTreeMap::new(),
            instances: BTreeSet::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Declare a node. Step names may not contain the reserved `.` and `:`
    /// separators; namespaced steps only come from [`embed`](Self::embed).
    pub fn add_node(&mut self, step: &str, index: u32, spec: NodeSpec) -> Result<NodeId> {
        if step.is_empty() {
            return Err(FlowError::validation("step name must not be empty"));
        }
        if step.contains(INSTANCE_SEPARATOR) || step.contains(INDEX_SEPARATOR) {
            return Err(FlowError::validation(format!(
                "step name '{step}' contains a reserved character ('{INSTANCE_SEPARATOR}' or '{INDEX_SEPARATOR}')"
            )));
        }
        let id = NodeId::new(step, index);
        self.insert_node(id.clone(), spec)?;
        Ok(id)
    }

    /// Node names double as on-disk file stems (`<step><index>`), so two
    /// distinct ids may not render to the same name.
    fn insert_node(&mut self, id: NodeId, spec: NodeSpec) -> Result<()> {
        if self.nodes.contains_key(&id) {
            return Err(FlowError::validation(format!(
                "node {id} is already declared in graph '{}'",
                self.name
            )));
        }
        let name = id.to_string();
        if let Some(other) = self.nodes.keys().find(|other| other.to_string() == name) {
            return Err(FlowError::validation(format!(
                "node ({}, {}) and node ({}, {}) share the name '{name}' in graph '{}'",
                other.step, other.index, id.step, id.index, self.name
            )));
        }
        self.nodes.insert(
            id,
            GraphNode {
                spec,
                deps: Vec::new(),
                dependents: Vec::new(),
            },
        );
        Ok(())
    }

    /// Add `tail -> head`. Both nodes must exist; an edge that would close a
    /// cycle is rejected. Adding an existing edge again is a no-op.
    pub fn add_edge(&mut self, tail: &NodeId, head: &NodeId) -> Result<()> {
        for id in [tail, head] {
            if !self.nodes.contains_key(id) {
                return Err(FlowError::NodeNotFound(id.clone()));
            }
        }

        if self.dependencies_of(head).contains(tail) {
            return Ok(());
        }

        if tail == head || self.has_path(head, tail) {
            return Err(FlowError::Cycle(format!(
                "edge {tail} -> {head} would create a cycle in graph '{}'",
                self.name
            )));
        }

        if let Some(node) = self.nodes.get_mut(head) {
            node.deps.push(tail.clone());
        }
        if let Some(node) = self.nodes.get_mut(tail) {
            node.dependents.push(head.clone());
        }
        Ok(())
    }

    /// Convenience for the common `(tail_step, 0) -> (head_step, 0)` edge.
    pub fn edge(&mut self, tail_step: &str, head_step: &str) -> Result<()> {
        self.add_edge(&NodeId::new(tail_step, 0), &NodeId::new(head_step, 0))
    }

    /// Clone every node and edge of `template` into this graph under the
    /// `instance.` prefix. Returns the namespaced entry nodes of the copy.
    pub fn embed(&mut self, template: &FlowGraph, instance: &str) -> Result<Vec<NodeId>> {
        if instance.is_empty()
            || instance.contains(INSTANCE_SEPARATOR)
            || instance.contains(INDEX_SEPARATOR)
        {
            return Err(FlowError::validation(format!(
                "invalid instance name '{instance}'"
            )));
        }
        let prefix = format!("{instance}{INSTANCE_SEPARATOR}");
        let collides = self.instances.contains(instance)
            || self
                .nodes
                .keys()
                .any(|id| id.step == instance || id.step.starts_with(&prefix));
        if collides {
            return Err(FlowError::validation(format!(
                "instance name '{instance}' collides with an existing prefix in graph '{}'",
                self.name
            )));
        }

        for (id, node) in template.nodes.iter() {
            self.insert_node(id.namespaced(instance), node.spec.clone())?;
        }
        for (id, node) in template.nodes.iter() {
            let head = id.namespaced(instance);
            for dep in node.deps.iter() {
                self.add_edge(&dep.namespaced(instance), &head)?;
            }
        }
        self.instances.insert(instance.to_string());

        debug!(
            graph = %self.name,
            template = %template.name,
            instance,
            nodes = template.len(),
            "embedded template graph"
        );

        Ok(template
            .entry_nodes()
            .into_iter()
            .map(|id| id.namespaced(instance))
            .collect())
    }

    /// Nodes without incoming edges.
    pub fn entry_nodes(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|(_, n)| n.deps.is_empty())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Nodes without outgoing edges.
    pub fn exit_nodes(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|(_, n)| n.dependents.is_empty())
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.keys()
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn spec(&self, id: &NodeId) -> Option<&NodeSpec> {
        self.nodes.get(id).map(|n| &n.spec)
    }

    pub fn spec_mut(&mut self, id: &NodeId) -> Option<&mut NodeSpec> {
        self.nodes.get_mut(id).map(|n| &mut n.spec)
    }

    /// Set a variable override on one node.
    pub fn set_var(&mut self, id: &NodeId, key: &str, value: impl Into<String>) -> Result<()> {
        let spec = self
            .spec_mut(id)
            .ok_or_else(|| FlowError::NodeNotFound(id.clone()))?;
        spec.vars.insert(key.to_string(), value.into());
        Ok(())
    }

    /// Immediate dependencies of a node.
    pub fn dependencies_of(&self, id: &NodeId) -> &[NodeId] {
        self.nodes
            .get(id)
            .map(|n| n.deps.as_slice())
            .unwrap_or(&[])
    }

    /// Immediate dependents of a node.
    pub fn dependents_of(&self, id: &NodeId) -> &[NodeId] {
        self.nodes
            .get(id)
            .map(|n| n.dependents.as_slice())
            .unwrap_or(&[])
    }

    /// All edges as `(tail, head)` pairs.
    pub fn edges(&self) -> Vec<(NodeId, NodeId)> {
        self.nodes
            .iter()
            .flat_map(|(head, n)| n.deps.iter().map(move |tail| (tail.clone(), head.clone())))
            .collect()
    }

    /// A topological execution order.
    pub fn topological_order(&self) -> Result<Vec<NodeId>> {
        let graph = self.as_graphmap();
        match toposort(&graph, None) {
            Ok(order) => Ok(order.into_iter().cloned().collect()),
            Err(cycle) => Err(FlowError::Cycle(format!(
                "cycle detected in graph '{}' involving node {}",
                self.name,
                cycle.node_id()
            ))),
        }
    }

    fn has_path(&self, from: &NodeId, to: &NodeId) -> bool {
        let (Some((from, _)), Some((to, _))) =
            (self.nodes.get_key_value(from), self.nodes.get_key_value(to))
        else {
            return false;
        };
        let graph = self.as_graphmap();
        has_path_connecting(&graph, from, to, None)
    }

    // Edge direction: dep -> dependent.
    fn as_graphmap(&self) -> DiGraphMap<&NodeId, ()> {
        let mut graph: DiGraphMap<&NodeId, ()> = DiGraphMap::new();
        for id in self.nodes.keys() {
            graph.add_node(id);
        }
        for (head, node) in self.nodes.iter() {
            for tail in node.deps.iter() {
                graph.add_edge(tail, head, ());
            }
        }
        graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(steps: &[&str]) -> FlowGraph {
        let mut g = FlowGraph::new("chain");
        for step in steps {
            g.add_node(step, 0, NodeSpec::new("nop")).unwrap();
        }
        for pair in steps.windows(2) {
            g.edge(pair[0], pair[1]).unwrap();
        }
        g
    }

    #[test]
    fn rejects_cycles_when_edge_is_added() {
        let mut g = chain(&["a", "b", "c"]);
        let err = g.edge("c", "a").unwrap_err();
        assert!(matches!(err, FlowError::Cycle(_)));
        let err = g.edge("b", "b").unwrap_err();
        assert!(matches!(err, FlowError::Cycle(_)));
        assert_eq!(g.topological_order().unwrap().len(), 3);
    }

    #[test]
    fn rejects_edges_to_undeclared_nodes() {
        let mut g = chain(&["a"]);
        let err = g.edge("a", "missing").unwrap_err();
        assert!(matches!(err, FlowError::NodeNotFound(id) if id.step == "missing"));
    }

    #[test]
    fn head_index_fans_variants_into_one_node() {
        let mut g = FlowGraph::new("fan");
        g.add_node("syn", 0, NodeSpec::new("nop")).unwrap();
        for i in 0..3 {
            g.add_node("place", i, NodeSpec::new("nop")).unwrap();
            g.add_edge(&NodeId::new("syn", 0), &NodeId::new("place", i)).unwrap();
        }
        g.add_node("select", 0, NodeSpec::new("minimum")).unwrap();
        for i in 0..3 {
            g.add_edge(&NodeId::new("place", i), &NodeId::new("select", 0)).unwrap();
        }
        assert_eq!(g.dependencies_of(&NodeId::new("select", 0)).len(), 3);
        assert_eq!(g.entry_nodes(), vec![NodeId::new("syn", 0)]);
        assert_eq!(g.exit_nodes(), vec![NodeId::new("select", 0)]);
    }

    #[test]
    fn embed_namespaces_copies_and_rejects_collisions() {
        let template = chain(&["syn", "place"]);
        let mut merged = FlowGraph::new("merged");
        let e0 = merged.embed(&template, "t0").unwrap();
        let e1 = merged.embed(&template, "t1").unwrap();
        assert_eq!(e0, vec![NodeId::new("t0.syn", 0)]);
        assert_eq!(e1, vec![NodeId::new("t1.syn", 0)]);
        assert_eq!(merged.len(), 4);
        assert_eq!(
            merged.dependencies_of(&NodeId::new("t1.place", 0)),
            &[NodeId::new("t1.syn", 0)]
        );
        assert_eq!(merged.nodes().filter(|id| id.strip_instance("t0").is_some()).count(), 2);

        let err = merged.embed(&template, "t0").unwrap_err();
        assert!(matches!(err, FlowError::Validation(_)));
    }

    #[test]
    fn reserved_characters_are_rejected_in_step_names() {
        let mut g = FlowGraph::new("g");
        assert!(g.add_node("a.b", 0, NodeSpec::new("nop")).is_err());
        assert!(g.add_node("a:b", 0, NodeSpec::new("nop")).is_err());
        assert!(g.add_node("a", 0, NodeSpec::new("nop")).is_ok());
        assert!(g.add_node("a", 0, NodeSpec::new("nop")).is_err());
    }

    #[test]
    fn ids_that_render_to_the_same_name_are_rejected() {
        let mut g = FlowGraph::new("g");
        g.add_node("place1", 0, NodeSpec::new("nop")).unwrap();
        let err = g.add_node("place", 10, NodeSpec::new("nop")).unwrap_err();
        assert!(matches!(&err, FlowError::Validation(msg) if msg.contains("'place10'")), "{err:?}");
        assert!(g.add_node("place", 1, NodeSpec::new("nop")).is_ok());

        // Embedded copies inherit the check.
        let mut merged = FlowGraph::new("merged");
        merged.embed(&g, "t0").unwrap();
        assert_eq!(merged.len(), 2);
    }
}
