// tests/cluster_dispatch.rs
//
// Cluster dispatch against stand-in `sbatch`/`squeue` scripts. The fake
// submit command runs the node script synchronously, so the real worker
// binary executes the node and leaves its record behind.

#![cfg(unix)]

mod common;
use crate::common::builders::linear_flow;
use crate::common::{context_for, init_tracing, with_timeout};

use std::error::Error;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use flowdag::dag::{FlowGraph, NodeSpec, ScheduledNode};
use flowdag::dispatch::cluster::GENERATED_MARKER;
use flowdag::dispatch::{ClusterDispatcher, ClusterOptions, NodeTicket};
use flowdag::engine::run_flow;
use flowdag::types::{NodeId, NodeState};

type TestResult = Result<(), Box<dyn Error>>;

fn write_executable(path: &Path, body: &str) -> std::io::Result<()> {
    fs::write(path, body)?;
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms)
}

/// Stand-in batch system living in `dir`.
fn fake_batch_system(dir: &Path) -> std::io::Result<ClusterOptions> {
    let submit = dir.join("sbatch");
    write_executable(
        &submit,
        "#!/bin/sh\nfor script; do :; done\nsh \"$script\" >/dev/null 2>&1\necho \"Submitted batch job 4242\"\n",
    )?;
    let status = dir.join("squeue");
    write_executable(&status, "#!/bin/sh\nexit 0\n")?;

    Ok(ClusterOptions {
        submit: submit.display().to_string(),
        status: status.display().to_string(),
        options: vec!["--partition=debug".to_string()],
        poll_interval_ms: 10,
        worker: Some(env!("CARGO_BIN_EXE_flowdag").to_string()),
    })
}

fn scheduled(id: NodeId, spec: NodeSpec) -> ScheduledNode {
    ScheduledNode {
        id,
        spec,
        inputs: vec![],
    }
}

fn chain_with_failing_syn() -> flowdag::errors::Result<FlowGraph> {
    let mut graph = FlowGraph::new("flow");
    graph.add_node("syn", 0, NodeSpec::shell("echo 'error: bad netlist'; exit 1"))?;
    graph.add_node("place", 0, NodeSpec::shell("echo place"))?;
    graph.edge("syn", "place")?;
    Ok(graph)
}

fn builddir(dir: &Path) -> PathBuf {
    dir.join("build")
}

#[test]
fn prepare_writes_ticket_and_generated_script() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let graph = linear_flow("flow", &["syn"]);
    let ctx = context_for(&builddir(dir.path()), "gcd", "job0", &graph);
    let dispatcher = ClusterDispatcher::new(ClusterOptions {
        worker: Some("/opt/flowdag/bin/flowdag".to_string()),
        ..ClusterOptions::default()
    })?;

    let id = NodeId::new("syn", 0);
    let script = dispatcher.prepare(&ctx, &scheduled(id.clone(), NodeSpec::shell("yosys")))?;

    assert_eq!(script, ClusterDispatcher::script_path(&ctx, &id));
    assert!(script.ends_with("gcd/job0/configs/syn0.sh"));
    let body = fs::read_to_string(&script)?;
    assert!(body.starts_with("#!/bin/sh\n"));
    assert!(body.contains(GENERATED_MARKER));
    assert!(body.contains("'/opt/flowdag/bin/flowdag' exec-node --ticket"));
    assert_eq!(fs::metadata(&script)?.permissions().mode() & 0o111, 0o111);

    let ticket: NodeTicket =
        serde_json::from_str(&fs::read_to_string(ClusterDispatcher::ticket_path(&ctx, &id))?)?;
    assert_eq!(ticket.node, id);
    assert_eq!(ticket.spec.vars["cmd"], "yosys");
    assert!(ticket.builddir.is_absolute());
    Ok(())
}

#[test]
fn user_supplied_script_is_left_untouched() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let graph = linear_flow("flow", &["route"]);
    let ctx = context_for(&builddir(dir.path()), "gcd", "job0", &graph);
    let dispatcher = ClusterDispatcher::new(ClusterOptions::default())?;

    let id = NodeId::new("route", 0);
    let path = ClusterDispatcher::script_path(&ctx, &id);
    fs::create_dir_all(path.parent().unwrap())?;
    let custom = "#!/bin/sh\n#SBATCH --mem=64G\nrun_route.sh\n";
    fs::write(&path, custom)?;

    let script = dispatcher.prepare(&ctx, &scheduled(id, NodeSpec::shell("openroad")))?;
    assert_eq!(script, path);
    assert_eq!(fs::read_to_string(&path)?, custom);
    Ok(())
}

#[tokio::test]
async fn cluster_run_merges_worker_records() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let options = fake_batch_system(dir.path())?;

    let mut graph = linear_flow("flow", &["syn"]);
    graph.add_node("place", 0, NodeSpec::shell("echo 'metric wirelength = 812 um'"))?;
    graph.edge("syn", "place")?;
    let ctx = context_for(&builddir(dir.path()), "gcd", "job0", &graph);

    let dispatcher = Arc::new(ClusterDispatcher::new(options)?);
    let summary = with_timeout(run_flow(graph, dispatcher, ctx.clone())).await?;

    assert!(summary.is_success(), "{summary}");
    let place = ctx.manifest.node(&NodeId::new("place", 0)).unwrap();
    assert_eq!(place.state, NodeState::Success);
    assert_eq!(place.metric("wirelength"), Some(812.0));
    assert_eq!(place.inputs, vec![NodeId::new("syn", 0)]);
    Ok(())
}

#[tokio::test]
async fn failing_cluster_node_skips_dependents() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let options = fake_batch_system(dir.path())?;

    let graph = chain_with_failing_syn()?;
    let ctx = context_for(&builddir(dir.path()), "gcd", "job0", &graph);

    let dispatcher = Arc::new(ClusterDispatcher::new(options)?);
    let summary = with_timeout(run_flow(graph, dispatcher, ctx.clone())).await?;

    assert_eq!(summary.states[&NodeId::new("syn", 0)], NodeState::Failed);
    assert_eq!(summary.states[&NodeId::new("place", 0)], NodeState::Skipped);
    let syn = ctx.manifest.node(&NodeId::new("syn", 0)).unwrap();
    assert!(syn.error.is_some());
    Ok(())
}

#[tokio::test]
async fn rejected_submission_fails_the_node() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let graph = linear_flow("flow", &["syn", "place"]);
    let ctx = context_for(&builddir(dir.path()), "gcd", "job0", &graph);
    let dispatcher = Arc::new(ClusterDispatcher::new(ClusterOptions {
        submit: "false".to_string(),
        poll_interval_ms: 10,
        ..ClusterOptions::default()
    })?);

    let summary = with_timeout(run_flow(graph, dispatcher, ctx.clone())).await?;

    assert_eq!(summary.states[&NodeId::new("syn", 0)], NodeState::Failed);
    assert_eq!(summary.states[&NodeId::new("place", 0)], NodeState::Skipped);
    assert_eq!(ctx.manifest.state_of(&NodeId::new("syn", 0)), Some(NodeState::Failed));
    Ok(())
}
