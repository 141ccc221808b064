// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod dispatch;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod manifest;
pub mod optimize;
pub mod types;

use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, info};

use crate::cli::{CliArgs, Command, FlowArgs};
use crate::config::{FlowConfig, load_and_validate};
use crate::dag::FlowGraph;
use crate::dispatch::{dispatcher_for, run_ticket};
use crate::engine::{RunSummary, run_flow};
use crate::errors::FlowError;
use crate::exec::context::manifest_path_in;
use crate::exec::{AdapterRegistry, FlowContext};
use crate::manifest::ManifestStore;
use crate::optimize::{
    OptimizationController, OptimizationReport, TrialResult, default_oracle, search_available,
};

/// High-level entry point used by `main.rs`.
pub async fn run(args: CliArgs) -> Result<()> {
    match args.command {
        Command::Run { flow, dry_run } => {
            let cfg = load_flow(&flow)?;
            if dry_run {
                print_dry_run(&cfg);
                return Ok(());
            }
            let summary = run_job(&cfg).await?;
            println!("{summary}");
            if !summary.is_success() {
                bail!("flow did not complete successfully: {summary}");
            }
            Ok(())
        }
        Command::Optimize { flow, seed } => {
            let cfg = load_flow(&flow)?;
            let report = optimize_job(&cfg, seed).await?;
            print_report(&report);
            Ok(())
        }
        Command::ExecNode { ticket } => {
            let outcome = run_ticket(&ticket, AdapterRegistry::with_builtins()?).await?;
            if !outcome.is_success() {
                bail!(
                    "node {} failed: {}",
                    outcome.node,
                    outcome.error.unwrap_or_default()
                );
            }
            Ok(())
        }
        Command::History { flow, job } => {
            let cfg = load_flow(&flow)?;
            print_history(&cfg, job.as_deref())
        }
    }
}

fn load_flow(flow: &FlowArgs) -> Result<FlowConfig> {
    let mut cfg = load_and_validate(&flow.config)
        .with_context(|| format!("loading flow file {}", flow.config.display()))?;
    if let Some(jobname) = &flow.jobname {
        cfg.option.jobname = jobname.clone();
    }
    Ok(cfg)
}

/// Manifest for a new run of `graph`, carrying over the history of an
/// existing manifest at the same location.
///
/// An existing manifest that cannot be read aborts the run so its history
/// is never overwritten.
fn fresh_manifest(cfg: &FlowConfig, graph: &FlowGraph) -> Result<ManifestStore> {
    let store = ManifestStore::for_graph(&cfg.option.design, &cfg.option.jobname, graph);
    let path = manifest_path(cfg);
    if path.exists() {
        let previous = ManifestStore::load(&path).with_context(|| {
            format!(
                "existing manifest {} is unreadable; move it aside to start a new history",
                path.display()
            )
        })?;
        for job in previous.history_jobs() {
            if let Some(snapshot) = previous.history(&job) {
                store.persist_history(&job, snapshot);
            }
        }
        debug!(path = %path.display(), "carried over manifest history");
    }
    Ok(store)
}

fn manifest_path(cfg: &FlowConfig) -> std::path::PathBuf {
    let job_dir = cfg
        .option
        .builddir
        .join(&cfg.option.design)
        .join(&cfg.option.jobname);
    manifest_path_in(&job_dir, &cfg.option.design)
}

fn context_for(cfg: &FlowConfig, manifest: ManifestStore) -> Result<FlowContext> {
    let adapters = Arc::new(AdapterRegistry::with_builtins()?);
    for id in cfg.graph().nodes() {
        if let Some(spec) = cfg.graph().spec(id) {
            if !adapters.contains(&spec.tool) {
                return Err(FlowError::ConfigError(format!(
                    "node '{id}' uses unknown tool '{}'",
                    spec.tool
                ))
                .into());
            }
        }
    }
    Ok(FlowContext::new(&cfg.option.builddir, manifest, adapters).with_hash(cfg.option.hash))
}

/// Run the flow once and record it in the job history.
pub async fn run_job(cfg: &FlowConfig) -> Result<RunSummary> {
    let graph = cfg.build_graph();
    let manifest = fresh_manifest(cfg, &graph)?;
    let ctx = context_for(cfg, manifest.clone())?;
    let dispatcher = dispatcher_for(cfg.option.dispatcher, cfg.option.scheduler.clone())?;

    let summary = run_flow(graph, dispatcher, ctx.clone()).await?;

    manifest.persist_history(&ctx.jobname, manifest.snapshot(&ctx.jobname));
    manifest.save(ctx.manifest_path())?;
    info!(path = %ctx.manifest_path().display(), "manifest written");
    Ok(summary)
}

/// Run the `[optimize]` search of `cfg`.
pub async fn optimize_job(cfg: &FlowConfig, seed: Option<u64>) -> Result<OptimizationReport> {
    let mut request = cfg
        .optimize()
        .cloned()
        .ok_or_else(|| anyhow!("flow file has no [optimize] section"))?;
    if seed.is_some() {
        request.seed = seed;
    }

    if !search_available() {
        return Err(FlowError::OracleUnavailable(
            "built without the `search` feature".to_string(),
        )
        .into());
    }
    let oracle = default_oracle(request.parameters.clone(), request.goals.clone(), request.seed)?;

    let template = cfg.build_graph();
    let manifest = fresh_manifest(cfg, &template)?;
    let ctx = context_for(cfg, manifest.clone())?;
    let dispatcher = dispatcher_for(cfg.option.dispatcher, cfg.option.scheduler.clone())?;

    let mut controller = OptimizationController::new(template, request, oracle, dispatcher, ctx.clone())?;
    let report = controller.run().await?;

    manifest.save(ctx.manifest_path())?;
    Ok(report)
}

fn print_report(report: &OptimizationReport) {
    let feasible = report.trials.iter().filter(|t| t.is_feasible()).count();
    println!(
        "optimization: {} trials in {} rounds ({} feasible, {} failed rounds)",
        report.trials.len(),
        report.rounds,
        feasible,
        report.failed_rounds
    );
    for trial in &report.trials {
        let result = match &trial.result {
            Some(TrialResult::Measured(m)) => format!("{m:?}"),
            Some(TrialResult::Infeasible(reason)) => format!("infeasible: {reason}"),
            None => "not run".to_string(),
        };
        println!("  {} {:?} -> {}", trial.jobname, trial.parameters, result);
    }
    for (n, trial) in report.optimal.iter().enumerate() {
        println!("optimal {n}:");
        for (key, value) in &trial.parameters {
            println!("  {key} = {value}");
        }
        for (key, value) in &trial.measurement {
            println!("  {key} = {value}");
        }
    }
}

fn print_history(cfg: &FlowConfig, job: Option<&str>) -> Result<()> {
    let path = manifest_path(cfg);
    let store = ManifestStore::load(&path)
        .with_context(|| format!("reading manifest {}", path.display()))?;

    let Some(job) = job else {
        for name in store.history_jobs() {
            println!("{name}");
        }
        return Ok(());
    };

    let snapshot = store
        .history(job)
        .ok_or_else(|| anyhow!("no history for job '{job}' in {}", path.display()))?;
    println!("{} (taken {})", snapshot.jobname, snapshot.taken_at);
    for (step, indices) in &snapshot.nodes {
        for (index, record) in indices {
            println!("  {step}{index}: {}", record.state);
            for (name, metric) in &record.metrics {
                let unit = metric.unit.as_deref().unwrap_or("");
                println!("      {name} = {} {unit}", metric.value);
            }
        }
    }
    Ok(())
}

/// Simple dry-run output: print nodes, deps and tools.
fn print_dry_run(cfg: &FlowConfig) {
    let graph = cfg.graph();
    println!("flowdag dry-run");
    println!("  option.design = {}", cfg.option.design);
    println!("  option.jobname = {}", cfg.option.jobname);
    println!("  option.dispatcher = {}", cfg.option.dispatcher);
    println!();

    println!("nodes ({}):", graph.len());
    for id in graph.nodes() {
        println!("  - {id}");
        if let Some(spec) = graph.spec(id) {
            println!("      tool: {}", spec.tool);
            if let Some(cmd) = spec.vars.get("cmd") {
                println!("      cmd: {cmd}");
            }
            if spec.continue_on_failure {
                println!("      continue: true");
            }
        }
        let deps = graph.dependencies_of(id);
        if !deps.is_empty() {
            let deps: Vec<String> = deps.iter().map(ToString::to_string).collect();
            println!("      after: {deps:?}");
        }
    }

    if let Some(request) = cfg.optimize() {
        println!();
        println!(
            "optimize: {} parameters, {} goals, {} rounds",
            request.parameters.len(),
            request.goals.len(),
            request.round_count()
        );
    }

    debug!("dry-run complete (no execution)");
}
