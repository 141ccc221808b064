// src/exec/adapter.rs

//! Tool adapter interface and the registry that resolves a node's `tool`
//! identifier to an adapter.
//!
//! An adapter translates a generic node into something runnable
//! ([`ToolAdapter::setup`]), may contribute extra command-line options
//! ([`ToolAdapter::runtime_options`]) and turns the tool's log into metrics
//! ([`ToolAdapter::post_process`]) through
//! [`ManifestStore::record_metric`].

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::dag::NodeSpec;
use crate::errors::{FlowError, Result};
use crate::exec::builtin::{NopAdapter, SelectorAdapter};
use crate::exec::shell::ShellAdapter;
use crate::manifest::ManifestStore;
use crate::types::NodeId;

/// Built-in selection strategies applied to a node's inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selector {
    /// Pass on every successful input.
    Join,
    /// Pick the successful input with the lowest weighted score.
    Minimum,
    /// Pick the successful input with the highest weighted score.
    Maximum,
}

impl Selector {
    pub fn tool_name(self) -> &'static str {
        match self {
            Selector::Join => "join",
            Selector::Minimum => "minimum",
            Selector::Maximum => "maximum",
        }
    }
}

/// What the executor should do for a node.
#[derive(Debug, Clone, PartialEq)]
pub enum Invocation {
    /// Spawn an external program inside the node's work directory.
    Command {
        program: String,
        args: Vec<String>,
        env: BTreeMap<String, String>,
    },
    /// Choose among the node's inputs in-process.
    Select(Selector),
    /// Nothing to run.
    Nop,
}

/// The node an adapter is asked to handle.
#[derive(Debug, Clone, Copy)]
pub struct NodeTask<'a> {
    pub id: &'a NodeId,
    pub spec: &'a NodeSpec,
    pub inputs: &'a [NodeId],
    pub workdir: &'a Path,
}

impl NodeTask<'_> {
    /// Log file the executor captures the tool's stdout/stderr into.
    pub fn log_path(&self) -> PathBuf {
        self.workdir.join(format!("{}.log", self.id.step))
    }

    pub fn outputs_dir(&self) -> PathBuf {
        self.workdir.join("outputs")
    }
}

pub trait ToolAdapter: Send + Sync {
    fn name(&self) -> &str;

    /// Build the invocation for `task`.
    fn setup(&self, task: &NodeTask<'_>) -> Result<Invocation>;

    /// Extra arguments appended to the command line.
    fn runtime_options(&self, task: &NodeTask<'_>) -> Vec<String> {
        task.spec.args.clone()
    }

    /// Extract metrics after a successful run.
    fn post_process(&self, _task: &NodeTask<'_>, _manifest: &ManifestStore) -> Result<()> {
        Ok(())
    }

    /// Built-ins that only look at the manifest run inside the control
    /// process, even under the cluster dispatcher.
    fn runs_in_process(&self) -> bool {
        false
    }
}

/// Lookup table from tool identifier to adapter.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn ToolAdapter>>,
}

impl fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

impl AdapterRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `shell`, `nop`, `join`, `minimum` and `maximum`.
    pub fn with_builtins() -> Result<Self> {
        let mut registry = Self::new();
        registry.register(ShellAdapter::new()?);
        registry.register(NopAdapter);
        for selector in [Selector::Join, Selector::Minimum, Selector::Maximum] {
            registry.register(SelectorAdapter::new(selector));
        }
        Ok(registry)
    }

    /// Register an adapter under its own name, replacing any previous one.
    pub fn register(&mut self, adapter: impl ToolAdapter + 'static) {
        self.adapters
            .insert(adapter.name().to_string(), Arc::new(adapter));
    }

    pub fn get(&self, tool: &str) -> Result<Arc<dyn ToolAdapter>> {
        self.adapters.get(tool).cloned().ok_or_else(|| {
            FlowError::ConfigError(format!(
                "no tool adapter registered for '{tool}' (known: {})",
                self.names().join(", ")
            ))
        })
    }

    pub fn contains(&self, tool: &str) -> bool {
        self.adapters.contains_key(tool)
    }

    /// Registered tool names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.adapters.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn runs_in_process(&self, tool: &str) -> bool {
        self.adapters
            .get(tool)
            .is_some_and(|adapter| adapter.runs_in_process())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_registered() {
        let registry = AdapterRegistry::with_builtins().unwrap();
        assert_eq!(
            registry.names(),
            vec!["join", "maximum", "minimum", "nop", "shell"]
        );
        assert!(registry.runs_in_process("join"));
        assert!(!registry.runs_in_process("shell"));
    }

    #[test]
    fn unknown_tool_is_a_config_error() {
        let registry = AdapterRegistry::with_builtins().unwrap();
        let err = registry.get("openroad").err().unwrap();
        assert!(matches!(err, FlowError::ConfigError(_)));
    }
}
