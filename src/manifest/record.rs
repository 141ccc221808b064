// src/manifest/record.rs

//! Serializable manifest document types.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{NodeId, NodeState};

/// Current manifest document version. Readers reject other major versions.
pub const MANIFEST_VERSION: &str = "1.0";

/// One recorded metric value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricEntry {
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// File the value was extracted from (usually the tool log).
    pub source: String,
}

/// A file produced by a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputFile {
    pub path: String,
    /// blake3 digest, present when output hashing is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// Everything the manifest knows about one node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub state: NodeState,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub inputs: Vec<NodeId>,
    /// Inputs chosen by a selector node (`join`, `minimum`, `maximum`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub selected: Vec<NodeId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<OutputFile>,
    #[serde(default)]
    pub metrics: BTreeMap<String, MetricEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NodeRecord {
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).map(|m| m.value)
    }

    /// Weighted sum of metrics; metrics missing from the record count as 0.
    pub fn score(&self, weights: &BTreeMap<String, f64>) -> f64 {
        weights
            .iter()
            .map(|(name, w)| w * self.metric(name).unwrap_or(0.0))
            .sum()
    }

    /// Wall time of the last attempt in seconds.
    pub fn elapsed_secs(&self) -> Option<f64> {
        let (start, end) = (self.started_at?, self.finished_at?);
        Some((end - start).num_milliseconds() as f64 / 1000.0)
    }
}

/// Node records keyed by step, then index.
pub type NodeTable = BTreeMap<String, BTreeMap<u32, NodeRecord>>;

/// Node states and metrics of one run, stored in the history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub jobname: String,
    pub taken_at: DateTime<Utc>,
    pub nodes: NodeTable,
}

impl JobSnapshot {
    pub fn node(&self, id: &NodeId) -> Option<&NodeRecord> {
        self.nodes.get(&id.step)?.get(&id.index)
    }

    /// Content digest over the node table (the timestamp is excluded).
    pub fn digest(&self) -> String {
        // Serializing a BTreeMap-backed table is deterministic.
        let bytes = serde_json::to_vec(&self.nodes).unwrap_or_default();
        blake3::hash(&bytes).to_hex().to_string()
    }
}

/// The persisted manifest document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub version: String,
    pub design: String,
    pub jobname: String,
    #[serde(default)]
    pub nodes: NodeTable,
    /// Per-job snapshots, addressed by job name.
    #[serde(default)]
    pub history: BTreeMap<String, JobSnapshot>,
}

impl Manifest {
    pub fn new(design: impl Into<String>, jobname: impl Into<String>) -> Self {
        Self {
            version: MANIFEST_VERSION.to_string(),
            design: design.into(),
            jobname: jobname.into(),
            nodes: NodeTable::new(),
            history: BTreeMap::new(),
        }
    }

    pub fn node(&self, id: &NodeId) -> Option<&NodeRecord> {
        self.nodes.get(&id.step)?.get(&id.index)
    }

    pub fn node_mut(&mut self, id: &NodeId) -> Option<&mut NodeRecord> {
        self.nodes.get_mut(&id.step)?.get_mut(&id.index)
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.iter().flat_map(|(step, indices)| {
            indices.keys().map(move |index| NodeId::new(step.clone(), *index))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_uses_weights_and_ignores_unweighted_metrics() {
        let mut record = NodeRecord::default();
        for (name, value) in [("area", 10.0), ("slack", -2.0), ("power", 99.0)] {
            record.metrics.insert(
                name.to_string(),
                MetricEntry {
                    value,
                    unit: None,
                    source: "x.log".to_string(),
                },
            );
        }
        let weights = BTreeMap::from([("area".to_string(), 1.0), ("slack".to_string(), -10.0)]);
        assert_eq!(record.score(&weights), 30.0);
    }

    #[test]
    fn digest_ignores_snapshot_time() {
        let a = JobSnapshot {
            jobname: "job0".to_string(),
            taken_at: Utc::now(),
            nodes: NodeTable::new(),
        };
        let mut b = a.clone();
        b.taken_at = a.taken_at + chrono::Duration::seconds(5);
        assert_eq!(a.digest(), b.digest());
    }
}
