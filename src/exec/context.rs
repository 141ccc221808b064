// src/exec/context.rs

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::exec::adapter::AdapterRegistry;
use crate::manifest::ManifestStore;
use crate::types::NodeId;

/// Everything a dispatcher needs to run nodes of one job.
///
/// Cheap to clone: the manifest and registry are shared handles.
#[derive(Debug, Clone)]
pub struct FlowContext {
    pub design: String,
    pub jobname: String,
    pub builddir: PathBuf,
    /// Record blake3 digests of node outputs.
    pub hash: bool,
    pub manifest: ManifestStore,
    pub adapters: Arc<AdapterRegistry>,
}

impl FlowContext {
    pub fn new(
        builddir: impl Into<PathBuf>,
        manifest: ManifestStore,
        adapters: Arc<AdapterRegistry>,
    ) -> Self {
        Self {
            design: manifest.design(),
            jobname: manifest.jobname(),
            builddir: builddir.into(),
            hash: false,
            manifest,
            adapters,
        }
    }

    pub fn with_hash(mut self, hash: bool) -> Self {
        self.hash = hash;
        self
    }

    /// `<builddir>/<design>/<jobname>`
    pub fn job_dir(&self) -> PathBuf {
        self.builddir.join(&self.design).join(&self.jobname)
    }

    /// `<builddir>/<design>/<jobname>/<step>/<index>`
    pub fn node_dir(&self, id: &NodeId) -> PathBuf {
        self.job_dir().join(&id.step).join(id.index.to_string())
    }

    /// Where the job manifest is saved.
    pub fn manifest_path(&self) -> PathBuf {
        manifest_path_in(&self.job_dir(), &self.design)
    }
}

pub fn manifest_path_in(job_dir: &Path, design: &str) -> PathBuf {
    job_dir.join(format!("{design}.manifest.json"))
}
