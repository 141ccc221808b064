// src/exec/executor.rs

//! Runs one node to completion and records the result in the manifest.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Read;
use std::path::Path;
use std::process::Stdio;

use anyhow::Context;
use blake3::Hasher;
use tokio::process::Command;
use tracing::{debug, error, info};

use crate::dag::ScheduledNode;
use crate::engine::NodeStatus;
use crate::errors::{FlowError, Result};
use crate::exec::adapter::{Invocation, NodeTask};
use crate::exec::builtin;
use crate::exec::context::FlowContext;
use crate::manifest::OutputFile;
use crate::types::NodeId;

/// Result of running a node, as reported back to the runtime.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeOutcome {
    pub node: NodeId,
    pub status: NodeStatus,
    pub metrics: BTreeMap<String, f64>,
    pub error: Option<String>,
}

impl NodeOutcome {
    pub fn failed(node: NodeId, error: impl Into<String>) -> Self {
        Self {
            node,
            status: NodeStatus::Failed,
            metrics: BTreeMap::new(),
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == NodeStatus::Success
    }
}

/// Executes a single scheduled node inside its work directory.
#[derive(Debug)]
pub struct NodeExecutor<'a> {
    ctx: &'a FlowContext,
}

impl<'a> NodeExecutor<'a> {
    pub fn new(ctx: &'a FlowContext) -> Self {
        Self { ctx }
    }

    /// Run `node`, stamping start and stop times and its final state.
    ///
    /// Tool failures are folded into a `Failed` outcome; they never escape
    /// as errors.
    pub async fn run(&self, node: &ScheduledNode) -> NodeOutcome {
        let manifest = &self.ctx.manifest;
        if manifest.node(&node.id).is_none() {
            manifest.register_node(&node.id, node.inputs.clone());
        }

        let result = match manifest.mark_running(&node.id) {
            Ok(_) => self.run_inner(node).await,
            Err(err) => Err(err),
        };

        let (status, error) = match result {
            Ok(()) => (NodeStatus::Success, None),
            Err(err) => {
                error!(node = %node.id, error = %err, "node failed");
                (NodeStatus::Failed, Some(err.to_string()))
            }
        };

        if let Err(err) = manifest.mark_finished(&node.id, status.as_state(), error.clone()) {
            error!(node = %node.id, error = %err, "could not record node completion");
        }

        let metrics = manifest
            .node(&node.id)
            .map(|r| r.metrics.into_iter().map(|(k, m)| (k, m.value)).collect())
            .unwrap_or_default();

        NodeOutcome {
            node: node.id.clone(),
            status,
            metrics,
            error,
        }
    }

    async fn run_inner(&self, node: &ScheduledNode) -> Result<()> {
        let adapter = self.ctx.adapters.get(&node.spec.tool)?;
        let workdir = self.ctx.node_dir(&node.id);
        let task = NodeTask {
            id: &node.id,
            spec: &node.spec,
            inputs: &node.inputs,
            workdir: &workdir,
        };

        fs::create_dir_all(task.outputs_dir())?;
        info!(node = %node.id, tool = adapter.name(), workdir = %workdir.display(), "running node");

        match adapter.setup(&task)? {
            Invocation::Command { program, args, env } => {
                run_command(&task, &program, &args, &env).await?;
            }
            Invocation::Select(selector) => {
                let selected = builtin::select(selector, &task, &self.ctx.manifest)?;
                self.ctx.manifest.set_selected(&node.id, selected)?;
            }
            Invocation::Nop => debug!(node = %node.id, "nothing to run"),
        }

        adapter.post_process(&task, &self.ctx.manifest)?;
        self.record_outputs(&task)?;
        Ok(())
    }

    fn record_outputs(&self, task: &NodeTask<'_>) -> Result<()> {
        let dir = task.outputs_dir();
        let mut files: Vec<_> = fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file())
            .collect();
        files.sort();

        for path in files {
            let digest = if self.ctx.hash {
                Some(compute_file_hash(&path)?)
            } else {
                None
            };
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            self.ctx.manifest.add_output(
                task.id,
                OutputFile {
                    path: format!("outputs/{name}"),
                    digest,
                },
            )?;
        }
        Ok(())
    }
}

async fn run_command(
    task: &NodeTask<'_>,
    program: &str,
    args: &[String],
    env: &BTreeMap<String, String>,
) -> Result<()> {
    let log_path = task.log_path();
    let log = File::create(&log_path)
        .with_context(|| format!("creating log file {}", log_path.display()))?;
    let log_err = log.try_clone()?;

    info!(node = %task.id, program, ?args, "starting tool process");

    let status = Command::new(program)
        .args(args)
        .envs(env)
        .current_dir(task.workdir)
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err))
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("spawning {program} for node {}", task.id))?
        .wait()
        .await
        .with_context(|| format!("waiting for {program} of node {}", task.id))?;

    let code = status.code().unwrap_or(-1);
    info!(node = %task.id, exit_code = code, success = status.success(), "tool process exited");

    if status.success() {
        Ok(())
    } else {
        Err(FlowError::tool(
            task.id,
            format!("exited with code {code}; see {}", log_path.display()),
        ))
    }
}

/// blake3 digest of a file's contents.
pub fn compute_file_hash(path: &Path) -> Result<String> {
    let mut hasher = Hasher::new();
    let mut file = File::open(path)
        .with_context(|| format!("opening file for hashing: {}", path.display()))?;
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}
