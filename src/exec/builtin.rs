// src/exec/builtin.rs

//! Built-in adapters that run inside the control process: `nop` and the
//! `join` / `minimum` / `maximum` input selectors.

use std::cmp::Ordering;

use tracing::{debug, info};

use crate::errors::{FlowError, Result};
use crate::exec::adapter::{Invocation, NodeTask, Selector, ToolAdapter};
use crate::manifest::ManifestStore;
use crate::types::{NodeId, NodeState};

pub struct NopAdapter;

impl ToolAdapter for NopAdapter {
    fn name(&self) -> &str {
        "nop"
    }

    fn setup(&self, _task: &NodeTask<'_>) -> Result<Invocation> {
        Ok(Invocation::Nop)
    }

    fn runs_in_process(&self) -> bool {
        true
    }
}

pub struct SelectorAdapter {
    selector: Selector,
}

impl SelectorAdapter {
    pub fn new(selector: Selector) -> Self {
        Self { selector }
    }
}

impl ToolAdapter for SelectorAdapter {
    fn name(&self) -> &str {
        self.selector.tool_name()
    }

    fn setup(&self, _task: &NodeTask<'_>) -> Result<Invocation> {
        Ok(Invocation::Select(self.selector))
    }

    fn runs_in_process(&self) -> bool {
        true
    }
}

/// Choose among the inputs of `task` according to `selector`.
///
/// Only inputs that succeeded are eligible. `minimum` and `maximum` also
/// pass over inputs reporting a non-zero `errors` metric, then compare the
/// weighted score from the node's `weights`; ties go to the lowest node id.
/// Fails when nothing is eligible.
pub fn select(selector: Selector, task: &NodeTask<'_>, manifest: &ManifestStore) -> Result<Vec<NodeId>> {
    let mut succeeded: Vec<NodeId> = task
        .inputs
        .iter()
        .filter(|id| manifest.state_of(id) == Some(NodeState::Success))
        .cloned()
        .collect();
    succeeded.sort();

    if selector == Selector::Join {
        if succeeded.is_empty() {
            return Err(FlowError::tool(task.id, "join: no input succeeded"));
        }
        info!(node = %task.id, selected = succeeded.len(), "join selected inputs");
        return Ok(succeeded);
    }

    let mut best: Option<(NodeId, f64)> = None;
    for id in succeeded {
        let Some(record) = manifest.node(&id) else {
            continue;
        };
        if record.metric("errors").is_some_and(|e| e > 0.0) {
            debug!(node = %task.id, input = %id, "input reported errors; not eligible");
            continue;
        }
        let score = record.score(&task.spec.weights);
        let better = match &best {
            None => true,
            Some((_, current)) => {
                let ord = score.partial_cmp(current).unwrap_or(Ordering::Equal);
                match selector {
                    Selector::Minimum => ord == Ordering::Less,
                    _ => ord == Ordering::Greater,
                }
            }
        };
        if better {
            best = Some((id, score));
        }
    }

    match best {
        Some((id, score)) => {
            info!(node = %task.id, selected = %id, score, "{} selected input", selector.tool_name());
            Ok(vec![id])
        }
        None => Err(FlowError::tool(
            task.id,
            format!("{}: no eligible input", selector.tool_name()),
        )),
    }
}
