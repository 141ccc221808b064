// src/dispatch/cluster.rs

//! Batch-system dispatcher.
//!
//! For every node a ticket (`configs/<step><index>.json`) and a wrapper
//! script (`configs/<step><index>.sh`) are written under the job directory.
//! The script is handed to the submit command (`sbatch` by default); on the
//! compute node it runs `flowdag exec-node --ticket <ticket>`, which executes
//! the node and leaves its manifest record in `<workdir>/record.json`. `wait`
//! polls the status command until the job leaves the queue and merges that
//! record back into the job manifest.
//!
//! A script at the conventional path that lacks [`GENERATED_MARKER`] was put
//! there by the user and is submitted as is.

use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::Duration;

use anyhow::Context;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::dag::{NodeSpec, ScheduledNode};
use crate::dispatch::{DispatchHandle, Dispatcher};
use crate::engine::NodeStatus;
use crate::errors::{FlowError, Result};
use crate::exec::{AdapterRegistry, FlowContext, NodeExecutor, NodeOutcome};
use crate::manifest::{ManifestStore, NodeRecord};
use crate::types::{DispatcherKind, NodeId, NodeState};

/// First-line marker of scripts written by flowdag.
pub const GENERATED_MARKER: &str = "# flowdag: generated node script";

/// File the worker leaves in the node work directory.
pub const RECORD_FILE: &str = "record.json";

fn default_submit() -> String {
    "sbatch".to_string()
}

fn default_status() -> String {
    "squeue".to_string()
}

fn default_poll_interval_ms() -> u64 {
    2000
}

/// `[option.scheduler]` settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterOptions {
    /// Batch submit command.
    #[serde(default = "default_submit")]
    pub submit: String,

    /// Queue status command, invoked as `<status> -h -j <job id>`.
    #[serde(default = "default_status")]
    pub status: String,

    /// Extra options passed to the submit command before the script.
    #[serde(default)]
    pub options: Vec<String>,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// flowdag executable used on compute nodes. Defaults to the running
    /// executable.
    #[serde(default)]
    pub worker: Option<String>,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            submit: default_submit(),
            status: default_status(),
            options: Vec::new(),
            poll_interval_ms: default_poll_interval_ms(),
            worker: None,
        }
    }
}

/// Serialized execution request for one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeTicket {
    pub design: String,
    pub jobname: String,
    pub builddir: PathBuf,
    #[serde(default)]
    pub hash: bool,
    pub node: NodeId,
    pub spec: NodeSpec,
    #[serde(default)]
    pub inputs: Vec<NodeId>,
}

/// A node queued on the batch system.
#[derive(Debug, Clone)]
pub struct ClusterJob {
    pub node: NodeId,
    pub job_id: String,
    pub workdir: PathBuf,
}

#[derive(Debug)]
pub struct ClusterDispatcher {
    options: ClusterOptions,
    job_id_re: Regex,
}

impl ClusterDispatcher {
    pub fn new(options: ClusterOptions) -> Result<Self> {
        Ok(Self {
            options,
            job_id_re: job_id_regex()?,
        })
    }

    pub fn options(&self) -> &ClusterOptions {
        &self.options
    }

    /// `<job_dir>/configs/<step><index>.sh`
    pub fn script_path(ctx: &FlowContext, id: &NodeId) -> PathBuf {
        ctx.job_dir().join("configs").join(format!("{id}.sh"))
    }

    pub fn ticket_path(ctx: &FlowContext, id: &NodeId) -> PathBuf {
        ctx.job_dir().join("configs").join(format!("{id}.json"))
    }

    /// Write the ticket and, unless the user supplied one, the wrapper
    /// script. Returns the script path.
    pub fn prepare(&self, ctx: &FlowContext, node: &ScheduledNode) -> Result<PathBuf> {
        let workdir = ctx.node_dir(&node.id);
        fs::create_dir_all(&workdir)?;
        let stale_record = workdir.join(RECORD_FILE);
        if stale_record.exists() {
            fs::remove_file(&stale_record)?;
        }

        let ticket_path = Self::ticket_path(ctx, &node.id);
        if let Some(dir) = ticket_path.parent() {
            fs::create_dir_all(dir)?;
        }
        let ticket = NodeTicket {
            design: ctx.design.clone(),
            jobname: ctx.jobname.clone(),
            builddir: absolute(&ctx.builddir)?,
            hash: ctx.hash,
            node: node.id.clone(),
            spec: node.spec.clone(),
            inputs: node.inputs.clone(),
        };
        fs::write(&ticket_path, serde_json::to_string_pretty(&ticket)?)?;

        let script_path = Self::script_path(ctx, &node.id);
        if is_user_script(&script_path)? {
            info!(node = %node.id, script = %script_path.display(), "using user-supplied node script");
            return Ok(script_path);
        }

        let script = self.render_script(&absolute(&workdir)?, &absolute(&ticket_path)?)?;
        fs::write(&script_path, script)?;
        set_executable(&script_path)?;
        debug!(node = %node.id, script = %script_path.display(), "wrote node script");
        Ok(script_path)
    }

    fn render_script(&self, workdir: &Path, ticket: &Path) -> Result<String> {
        let worker = match &self.options.worker {
            Some(worker) => worker.clone(),
            None => std::env::current_exe()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|_| "flowdag".to_string()),
        };
        Ok(format!(
            "#!/bin/sh\n{GENERATED_MARKER}\ncd {}\nexec {} exec-node --ticket {}\n",
            shell_quote(&workdir.display().to_string()),
            shell_quote(&worker),
            shell_quote(&ticket.display().to_string()),
        ))
    }

    async fn submit_script(&self, node: &NodeId, script: &Path) -> Result<String> {
        let output = Command::new(&self.options.submit)
            .args(&self.options.options)
            .arg(script)
            .output()
            .await
            .with_context(|| format!("running submit command '{}'", self.options.submit))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            return Err(FlowError::Dispatch(format!(
                "submitting {node} failed ({}): {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        parse_job_id(&self.job_id_re, &stdout).ok_or_else(|| {
            FlowError::Dispatch(format!(
                "no job id in submit output for {node}: {}",
                stdout.trim()
            ))
        })
    }

    /// `true` while the batch system still lists `job_id`.
    async fn job_queued(&self, job_id: &str) -> bool {
        let output = Command::new(&self.options.status)
            .args(["-h", "-j", job_id])
            .output()
            .await;
        match output {
            Ok(out) if out.status.success() => !String::from_utf8_lossy(&out.stdout).trim().is_empty(),
            Ok(_) => false,
            Err(err) => {
                warn!(job_id, error = %err, "status command failed; treating job as finished");
                false
            }
        }
    }
}

impl Dispatcher for ClusterDispatcher {
    fn kind(&self) -> DispatcherKind {
        DispatcherKind::Cluster
    }

    fn submit<'a>(
        &'a self,
        ctx: &'a FlowContext,
        node: ScheduledNode,
    ) -> Pin<Box<dyn Future<Output = Result<DispatchHandle>> + Send + 'a>> {
        Box::pin(async move {
            if ctx.adapters.runs_in_process(&node.spec.tool) {
                let outcome = NodeExecutor::new(ctx).run(&node).await;
                return Ok(DispatchHandle::Completed(outcome));
            }

            if ctx.manifest.node(&node.id).is_none() {
                ctx.manifest.register_node(&node.id, node.inputs.clone());
            }
            ctx.manifest.mark_running(&node.id)?;

            let script = self.prepare(ctx, &node)?;
            let job_id = self.submit_script(&node.id, &script).await?;
            info!(node = %node.id, job_id = %job_id, "submitted node to cluster");

            Ok(DispatchHandle::Cluster(ClusterJob {
                node: node.id.clone(),
                job_id,
                workdir: ctx.node_dir(&node.id),
            }))
        })
    }

    fn wait<'a>(
        &'a self,
        ctx: &'a FlowContext,
        handle: DispatchHandle,
    ) -> Pin<Box<dyn Future<Output = NodeOutcome> + Send + 'a>> {
        Box::pin(async move {
            let job = match handle {
                DispatchHandle::Completed(outcome) => return outcome,
                DispatchHandle::Cluster(job) => job,
            };

            let interval = Duration::from_millis(self.options.poll_interval_ms.max(1));
            while self.job_queued(&job.job_id).await {
                tokio::time::sleep(interval).await;
            }
            debug!(node = %job.node, job_id = %job.job_id, "job left the queue");

            match collect_record(&ctx.manifest, &job) {
                Ok(outcome) => outcome,
                Err(err) => {
                    let reason = err.to_string();
                    warn!(node = %job.node, job_id = %job.job_id, error = %reason, "cluster node failed");
                    if let Err(err) =
                        ctx.manifest
                            .mark_finished(&job.node, NodeState::Failed, Some(reason.clone()))
                    {
                        warn!(node = %job.node, error = %err, "could not record cluster failure");
                    }
                    NodeOutcome::failed(job.node, reason)
                }
            }
        })
    }
}

/// Merge the worker's record into the job manifest.
fn collect_record(manifest: &ManifestStore, job: &ClusterJob) -> Result<NodeOutcome> {
    let path = job.workdir.join(RECORD_FILE);
    let contents = fs::read_to_string(&path).map_err(|err| {
        FlowError::Dispatch(format!(
            "job {} left no record at {}: {err}",
            job.job_id,
            path.display()
        ))
    })?;
    let record: NodeRecord = serde_json::from_str(&contents)?;

    let status = match record.state {
        NodeState::Success => NodeStatus::Success,
        _ => NodeStatus::Failed,
    };
    let outcome = NodeOutcome {
        node: job.node.clone(),
        status,
        metrics: record
            .metrics
            .iter()
            .map(|(name, m)| (name.clone(), m.value))
            .collect(),
        error: record.error.clone(),
    };
    manifest.merge_record(&job.node, record)?;
    Ok(outcome)
}

/// Worker side of cluster dispatch: run the node described by a ticket and
/// write its record next to its outputs.
pub async fn run_ticket(path: impl AsRef<Path>, adapters: AdapterRegistry) -> Result<NodeOutcome> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)
        .with_context(|| format!("reading node ticket {}", path.display()))?;
    let ticket: NodeTicket = serde_json::from_str(&contents)?;
    info!(node = %ticket.node, job = %ticket.jobname, "executing node from ticket");

    let manifest = ManifestStore::new(&ticket.design, &ticket.jobname);
    manifest.register_node(&ticket.node, ticket.inputs.clone());
    let ctx = FlowContext::new(&ticket.builddir, manifest.clone(), std::sync::Arc::new(adapters))
        .with_hash(ticket.hash);

    let node = ScheduledNode {
        id: ticket.node.clone(),
        spec: ticket.spec,
        inputs: ticket.inputs,
    };
    let outcome = NodeExecutor::new(&ctx).run(&node).await;

    let record = manifest
        .node(&node.id)
        .ok_or_else(|| FlowError::NodeNotFound(node.id.clone()))?;
    let record_path = ctx.node_dir(&node.id).join(RECORD_FILE);
    if let Some(dir) = record_path.parent() {
        fs::create_dir_all(dir)?;
    }
    fs::write(&record_path, serde_json::to_string_pretty(&record)?)?;
    Ok(outcome)
}

fn job_id_regex() -> Result<Regex> {
    Ok(Regex::new(r"(\d+)").context("compiling job id pattern")?)
}

/// First number in the submit output: handles both
/// `Submitted batch job 1234` and `--parsable` (`1234;cluster`).
pub fn parse_job_id(re: &Regex, stdout: &str) -> Option<String> {
    re.captures(stdout).map(|caps| caps[1].to_string())
}

fn is_user_script(path: &Path) -> Result<bool> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(!contents.contains(GENERATED_MARKER)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err.into()),
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    Ok(std::path::absolute(path)?)
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

#[cfg(unix)]
fn set_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> Result<()> {
    Ok(())
}
