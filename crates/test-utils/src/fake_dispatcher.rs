use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use flowdag::dag::ScheduledNode;
use flowdag::dispatch::{DispatchHandle, Dispatcher};
use flowdag::engine::NodeStatus;
use flowdag::errors::Result;
use flowdag::exec::{FlowContext, NodeOutcome};
use flowdag::types::{DispatcherKind, NodeId, NodeState};

type Predicate = Arc<dyn Fn(&ScheduledNode) -> bool + Send + Sync>;
type MetricFn = Arc<dyn Fn(&ScheduledNode) -> BTreeMap<String, f64> + Send + Sync>;

/// Step name without any `instance.` prefix.
pub fn base_step(id: &NodeId) -> &str {
    id.step.rsplit('.').next().unwrap_or(&id.step)
}

/// A fake dispatcher that:
/// - records which nodes were submitted, in order
/// - fails nodes matching a predicate
/// - records scripted metrics on the nodes that succeed
/// - optionally reports completions of one job under an unknown node, so
///   the runtime for that job stalls
///
/// It never spawns processes and completes every node inside `submit`.
#[derive(Clone)]
pub struct FakeDispatcher {
    submitted: Arc<Mutex<Vec<NodeId>>>,
    fail: Predicate,
    metrics: MetricFn,
    lost_job: Option<String>,
}

impl FakeDispatcher {
    pub fn new() -> Self {
        Self {
            submitted: Arc::new(Mutex::new(Vec::new())),
            fail: Arc::new(|_| false),
            metrics: Arc::new(|_| BTreeMap::new()),
            lost_job: None,
        }
    }

    /// Fail every node whose base step is `step`, in any instance.
    pub fn failing_step(self, step: &str) -> Self {
        let step = step.to_string();
        self.failing_when(move |node| base_step(&node.id) == step)
    }

    pub fn failing_when(
        mut self,
        pred: impl Fn(&ScheduledNode) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.fail = Arc::new(pred);
        self
    }

    pub fn with_metrics(
        mut self,
        f: impl Fn(&ScheduledNode) -> BTreeMap<String, f64> + Send + Sync + 'static,
    ) -> Self {
        self.metrics = Arc::new(f);
        self
    }

    /// Lose every completion of the run whose job name is `jobname`.
    pub fn losing_completions_of(mut self, jobname: &str) -> Self {
        self.lost_job = Some(jobname.to_string());
        self
    }

    pub fn submitted(&self) -> Vec<NodeId> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn submitted_steps(&self) -> Vec<String> {
        self.submitted().iter().map(|id| id.step.clone()).collect()
    }
}

impl Default for FakeDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher for FakeDispatcher {
    fn kind(&self) -> DispatcherKind {
        DispatcherKind::Local
    }

    fn submit<'a>(
        &'a self,
        ctx: &'a FlowContext,
        node: ScheduledNode,
    ) -> Pin<Box<dyn Future<Output = Result<DispatchHandle>> + Send + 'a>> {
        Box::pin(async move {
            self.submitted.lock().unwrap().push(node.id.clone());
            ctx.manifest.mark_running(&node.id)?;

            if self.lost_job.as_deref() == Some(ctx.jobname.as_str()) {
                let stray = NodeId::new("lost", 0);
                return Ok(DispatchHandle::Completed(NodeOutcome::failed(stray, "completion lost")));
            }

            if (self.fail)(&node) {
                let reason = format!("scripted failure of {}", node.id);
                ctx.manifest
                    .mark_finished(&node.id, NodeState::Failed, Some(reason.clone()))?;
                return Ok(DispatchHandle::Completed(NodeOutcome::failed(node.id, reason)));
            }

            let metrics = (self.metrics)(&node);
            for (name, value) in &metrics {
                ctx.manifest
                    .record_metric(&node.id.step, node.id.index, name, *value, "fake.log", None)?;
            }
            ctx.manifest.mark_finished(&node.id, NodeState::Success, None)?;

            Ok(DispatchHandle::Completed(NodeOutcome {
                node: node.id,
                status: NodeStatus::Success,
                metrics,
                error: None,
            }))
        })
    }

    fn wait<'a>(
        &'a self,
        _ctx: &'a FlowContext,
        handle: DispatchHandle,
    ) -> Pin<Box<dyn Future<Output = NodeOutcome> + Send + 'a>> {
        Box::pin(async move {
            match handle {
                DispatchHandle::Completed(outcome) => outcome,
                DispatchHandle::Cluster(job) => {
                    NodeOutcome::failed(job.node, "fake dispatcher never queues jobs")
                }
            }
        })
    }
}
