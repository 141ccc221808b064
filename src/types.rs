use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Separator between an embedded instance name and the template step name.
pub const INSTANCE_SEPARATOR: char = '.';

/// Separator used in config files between a step and an explicit index
/// (`"place:1"`).
pub const INDEX_SEPARATOR: char = ':';

/// A `(step, index)` pair identifying one node inside a graph instance.
///
/// Ordering is by step name, then index, which keeps manifest output and
/// log lines stable.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId {
    pub step: String,
    pub index: u32,
}

impl NodeId {
    pub fn new(step: impl Into<String>, index: u32) -> Self {
        Self {
            step: step.into(),
            index,
        }
    }

    /// Same node inside an embedded copy named `instance`.
    pub fn namespaced(&self, instance: &str) -> Self {
        Self {
            step: format!("{instance}{INSTANCE_SEPARATOR}{}", self.step),
            index: self.index,
        }
    }

    /// Instance prefix of a namespaced node, if any.
    pub fn instance(&self) -> Option<&str> {
        self.step
            .split_once(INSTANCE_SEPARATOR)
            .map(|(instance, _)| instance)
    }

    /// Strip `instance.` from the step name. Returns `None` if the node does
    /// not belong to that instance.
    pub fn strip_instance(&self, instance: &str) -> Option<Self> {
        let rest = self.step.strip_prefix(instance)?;
        let step = rest.strip_prefix(INSTANCE_SEPARATOR)?;
        Some(Self::new(step, self.index))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.step, self.index)
    }
}

impl FromStr for NodeId {
    type Err = String;

    /// Parses `"step"` (index 0) or `"step:index"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.split_once(INDEX_SEPARATOR) {
            Some((step, index)) => {
                let index = index
                    .trim()
                    .parse::<u32>()
                    .map_err(|e| format!("invalid index in node reference '{s}': {e}"))?;
                if step.trim().is_empty() {
                    return Err(format!("empty step in node reference '{s}'"));
                }
                Ok(NodeId::new(step.trim(), index))
            }
            None if s.is_empty() => Err("empty node reference".to_string()),
            None => Ok(NodeId::new(s, 0)),
        }
    }
}

/// Scheduling state of a node within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    #[default]
    Pending,
    Running,
    Success,
    Failed,
    /// Not executed because an upstream dependency failed.
    Skipped,
}

impl NodeState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            NodeState::Success | NodeState::Failed | NodeState::Skipped
        )
    }

    /// Failed or skipped: downstream nodes without the continuation flag
    /// must not run.
    pub fn blocks_downstream(self) -> bool {
        matches!(self, NodeState::Failed | NodeState::Skipped)
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeState::Pending => "pending",
            NodeState::Running => "running",
            NodeState::Success => "success",
            NodeState::Failed => "failed",
            NodeState::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Which dispatcher executes ready nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DispatcherKind {
    /// Run nodes in-process on this machine, one at a time (default).
    #[default]
    Local,
    /// Submit nodes to an external batch system.
    #[serde(alias = "slurm")]
    Cluster,
}

impl fmt::Display for DispatcherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DispatcherKind::Local => "local",
            DispatcherKind::Cluster => "cluster",
        })
    }
}

impl FromStr for DispatcherKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(DispatcherKind::Local),
            "cluster" | "slurm" => Ok(DispatcherKind::Cluster),
            other => Err(format!(
                "invalid dispatcher: {other} (expected \"local\" or \"cluster\")"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_node_references() {
        assert_eq!("syn".parse::<NodeId>().unwrap(), NodeId::new("syn", 0));
        assert_eq!("place:2".parse::<NodeId>().unwrap(), NodeId::new("place", 2));
        assert!("place:x".parse::<NodeId>().is_err());
        assert!(":1".parse::<NodeId>().is_err());
    }

    #[test]
    fn namespacing_round_trips() {
        let id = NodeId::new("route", 1);
        let ns = id.namespaced("trial3");
        assert_eq!(ns.step, "trial3.route");
        assert_eq!(ns.to_string(), "trial3.route1");
        assert_eq!(ns.instance(), Some("trial3"));
        assert_eq!(ns.strip_instance("trial3"), Some(id.clone()));
        assert_eq!(ns.strip_instance("trial"), None);
    }
}
