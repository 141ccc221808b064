// src/manifest/store.rs

//! Shared, thread-safe access to a [`Manifest`].

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::dag::FlowGraph;
use crate::errors::{FlowError, Result};
use crate::manifest::record::{
    JobSnapshot, MANIFEST_VERSION, Manifest, MetricEntry, NodeRecord, NodeTable, OutputFile,
};
use crate::types::{NodeId, NodeState};

/// Handle to the manifest of one job.
///
/// Cloning is cheap and all clones share the same document, so the runtime,
/// the dispatcher and background wait tasks can all record into it. Each
/// node's record is only written by the one execution in flight for it.
#[derive(Debug, Clone)]
pub struct ManifestStore {
    inner: Arc<Mutex<Manifest>>,
}

impl ManifestStore {
    pub fn new(design: impl Into<String>, jobname: impl Into<String>) -> Self {
        Self::from_manifest(Manifest::new(design, jobname))
    }

    pub fn from_manifest(manifest: Manifest) -> Self {
        Self {
            inner: Arc::new(Mutex::new(manifest)),
        }
    }

    /// Manifest with a `Pending` record for every node of `graph`.
    pub fn for_graph(design: impl Into<String>, jobname: impl Into<String>, graph: &FlowGraph) -> Self {
        let store = Self::new(design, jobname);
        for id in graph.nodes() {
            store.register_node(id, graph.dependencies_of(id).to_vec());
        }
        store
    }

    fn lock(&self) -> MutexGuard<'_, Manifest> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_node<T>(&self, id: &NodeId, f: impl FnOnce(&mut NodeRecord) -> T) -> Result<T> {
        let mut manifest = self.lock();
        let record = manifest
            .node_mut(id)
            .ok_or_else(|| FlowError::NodeNotFound(id.clone()))?;
        Ok(f(record))
    }

    pub fn design(&self) -> String {
        self.lock().design.clone()
    }

    pub fn jobname(&self) -> String {
        self.lock().jobname.clone()
    }

    /// Copy of the whole document.
    pub fn manifest(&self) -> Manifest {
        self.lock().clone()
    }

    /// Add (or reset) a node record.
    pub fn register_node(&self, id: &NodeId, inputs: Vec<NodeId>) {
        let mut manifest = self.lock();
        manifest.nodes.entry(id.step.clone()).or_default().insert(
            id.index,
            NodeRecord {
                inputs,
                ..NodeRecord::default()
            },
        );
    }

    pub fn node(&self, id: &NodeId) -> Option<NodeRecord> {
        self.lock().node(id).cloned()
    }

    pub fn state_of(&self, id: &NodeId) -> Option<NodeState> {
        self.lock().node(id).map(|r| r.state)
    }

    pub fn metric(&self, id: &NodeId, name: &str) -> Option<f64> {
        self.lock().node(id).and_then(|r| r.metric(name))
    }

    /// Record (or overwrite) a metric on a node.
    ///
    /// This is the ingestion point for tool adapters. Skipped nodes never
    /// carry metrics, so recording on one is an error. Values must be finite
    /// since JSON has no representation for NaN or infinity.
    pub fn record_metric(
        &self,
        step: &str,
        index: u32,
        name: &str,
        value: f64,
        source_file: &str,
        unit: Option<&str>,
    ) -> Result<()> {
        let id = NodeId::new(step, index);
        if !value.is_finite() {
            return Err(FlowError::validation(format!(
                "metric '{name}' on {id} is not a finite number ({value})"
            )));
        }
        let mut manifest = self.lock();
        let record = manifest
            .node_mut(&id)
            .ok_or_else(|| FlowError::NodeNotFound(id.clone()))?;

        if record.state == NodeState::Skipped {
            return Err(FlowError::MetricOnSkipped {
                node: id,
                metric: name.to_string(),
            });
        }

        debug!(node = %id, metric = name, value, "recording metric");
        record.metrics.insert(
            name.to_string(),
            MetricEntry {
                value,
                unit: unit.map(str::to_string),
                source: source_file.to_string(),
            },
        );
        Ok(())
    }

    /// Stamp the start of a new attempt.
    pub fn mark_running(&self, id: &NodeId) -> Result<DateTime<Utc>> {
        let now = Utc::now();
        self.with_node(id, |r| {
            r.state = NodeState::Running;
            r.attempts += 1;
            r.started_at = Some(now);
            r.finished_at = None;
            r.error = None;
        })?;
        Ok(now)
    }

    /// Stamp the end of the current attempt with its final state.
    pub fn mark_finished(&self, id: &NodeId, state: NodeState, error: Option<String>) -> Result<()> {
        let now = Utc::now();
        self.with_node(id, |r| {
            r.state = state;
            r.finished_at = Some(now);
            r.error = error;
        })
    }

    /// Set a node's state without touching timestamps. Moving a node to
    /// `Skipped` drops any metrics it might carry.
    pub fn set_state(&self, id: &NodeId, state: NodeState) -> Result<()> {
        self.with_node(id, |r| {
            r.state = state;
            if state == NodeState::Skipped && !r.metrics.is_empty() {
                warn!(node = %id, "dropping metrics from skipped node");
                r.metrics.clear();
            }
        })
    }

    pub fn set_selected(&self, id: &NodeId, selected: Vec<NodeId>) -> Result<()> {
        self.with_node(id, |r| r.selected = selected)
    }

    pub fn add_output(&self, id: &NodeId, output: OutputFile) -> Result<()> {
        self.with_node(id, |r| {
            r.outputs.retain(|o| o.path != output.path);
            r.outputs.push(output);
        })
    }

    /// Replace a node's record with one produced elsewhere (a cluster
    /// worker). The locally known inputs are kept.
    pub fn merge_record(&self, id: &NodeId, mut record: NodeRecord) -> Result<()> {
        self.with_node(id, |r| {
            record.inputs = std::mem::take(&mut r.inputs);
            if record.state == NodeState::Skipped {
                record.metrics.clear();
            }
            *r = record;
        })
    }

    /// Serialize current node states and metrics.
    pub fn snapshot(&self, jobname: &str) -> JobSnapshot {
        JobSnapshot {
            jobname: jobname.to_string(),
            taken_at: Utc::now(),
            nodes: self.lock().nodes.clone(),
        }
    }

    /// Snapshot restricted to the embedded copy `instance`, with the
    /// instance prefix stripped so it reads like a standalone flow run.
    /// Inputs pointing outside the instance are dropped.
    pub fn snapshot_instance(&self, jobname: &str, instance: &str) -> JobSnapshot {
        let manifest = self.lock();
        let mut nodes = NodeTable::new();

        for id in manifest.node_ids() {
            let Some(local) = id.strip_instance(instance) else {
                continue;
            };
            let Some(record) = manifest.node(&id) else {
                continue;
            };
            let mut record = record.clone();
            record.inputs = record
                .inputs
                .iter()
                .filter_map(|i| i.strip_instance(instance))
                .collect();
            record.selected = record
                .selected
                .iter()
                .filter_map(|i| i.strip_instance(instance))
                .collect();
            nodes.entry(local.step).or_default().insert(local.index, record);
        }

        JobSnapshot {
            jobname: jobname.to_string(),
            taken_at: Utc::now(),
            nodes,
        }
    }

    /// Store `snapshot` under `history.<jobname>`.
    ///
    /// Re-writing the same job name replaces the entry; writing identical
    /// content again is a no-op. Returns whether the history changed.
    pub fn persist_history(&self, jobname: &str, snapshot: JobSnapshot) -> bool {
        let mut manifest = self.lock();
        if let Some(existing) = manifest.history.get(jobname) {
            if existing.digest() == snapshot.digest() {
                debug!(job = jobname, "history unchanged; not rewriting");
                return false;
            }
        }
        info!(job = jobname, "persisting job history");
        manifest.history.insert(jobname.to_string(), snapshot);
        true
    }

    pub fn history(&self, jobname: &str) -> Option<JobSnapshot> {
        self.lock().history.get(jobname).cloned()
    }

    pub fn history_jobs(&self) -> Vec<String> {
        self.lock().history.keys().cloned().collect()
    }

    /// Write the manifest as pretty JSON, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(&*self.lock())?;
        fs::write(path, json)?;
        debug!(path = %path.display(), "wrote manifest");
        Ok(())
    }

    /// Load a manifest written by [`save`](Self::save).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref())?;
        let manifest: Manifest = serde_json::from_str(&contents)?;
        if major(&manifest.version) != major(MANIFEST_VERSION) {
            return Err(FlowError::validation(format!(
                "unsupported manifest version {} (expected {MANIFEST_VERSION})",
                manifest.version
            )));
        }
        Ok(Self::from_manifest(manifest))
    }
}

fn major(version: &str) -> &str {
    version.split('.').next().unwrap_or(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ManifestStore {
        let s = ManifestStore::new("gcd", "job0");
        s.register_node(&NodeId::new("syn", 0), vec![]);
        s.register_node(&NodeId::new("place", 0), vec![NodeId::new("syn", 0)]);
        s
    }

    #[test]
    fn metrics_overwrite_and_unknown_nodes_fail() {
        let s = store();
        s.record_metric("syn", 0, "cells", 10.0, "syn.log", None).unwrap();
        s.record_metric("syn", 0, "cells", 12.0, "syn.log", Some("count")).unwrap();
        assert_eq!(s.metric(&NodeId::new("syn", 0), "cells"), Some(12.0));

        let err = s.record_metric("cts", 0, "x", 1.0, "cts.log", None).unwrap_err();
        assert!(matches!(err, FlowError::NodeNotFound(_)));
    }

    #[test]
    fn skipped_nodes_reject_metrics() {
        let s = store();
        let place = NodeId::new("place", 0);
        s.set_state(&place, NodeState::Skipped).unwrap();
        let err = s.record_metric("place", 0, "wns", 0.1, "place.log", None).unwrap_err();
        assert!(matches!(err, FlowError::MetricOnSkipped { .. }));
        assert!(s.node(&place).unwrap().metrics.is_empty());
    }

    #[test]
    fn non_finite_metrics_are_rejected_and_manifest_stays_loadable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gcd.json");
        let s = store();
        for bad in [f64::INFINITY, f64::NEG_INFINITY, f64::NAN] {
            let err = s.record_metric("syn", 0, "wns", bad, "syn.log", None).unwrap_err();
            assert!(matches!(err, FlowError::Validation(_)), "{err:?}");
        }
        s.record_metric("syn", 0, "wns", -0.25, "syn.log", None).unwrap();
        s.persist_history("job0", s.snapshot("job0"));
        s.save(&path).unwrap();

        let loaded = ManifestStore::load(&path).unwrap();
        assert_eq!(loaded.metric(&NodeId::new("syn", 0), "wns"), Some(-0.25));
        assert!(loaded.history("job0").is_some());
    }

    #[test]
    fn persist_history_is_idempotent() {
        let s = store();
        s.record_metric("syn", 0, "cells", 10.0, "syn.log", None).unwrap();
        assert!(s.persist_history("job0", s.snapshot("job0")));
        assert!(!s.persist_history("job0", s.snapshot("job0")));
        s.record_metric("syn", 0, "cells", 11.0, "syn.log", None).unwrap();
        assert!(s.persist_history("job0", s.snapshot("job0")));
        assert_eq!(s.history_jobs(), vec!["job0".to_string()]);
    }

    #[test]
    fn attempts_and_timestamps_are_stamped() {
        let s = store();
        let syn = NodeId::new("syn", 0);
        s.mark_running(&syn).unwrap();
        s.mark_finished(&syn, NodeState::Success, None).unwrap();
        let record = s.node(&syn).unwrap();
        assert_eq!(record.attempts, 1);
        assert_eq!(record.state, NodeState::Success);
        assert!(record.elapsed_secs().unwrap() >= 0.0);
    }
}
