// src/engine/runtime.rs

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::dag::{FlowGraph, ScheduledNode, Scheduler, SchedulerStep};
use crate::dispatch::Dispatcher;
use crate::errors::{FlowError, Result};
use crate::exec::FlowContext;
use crate::types::NodeState;

use super::{NodeCompletion, NodeStatus, RunSummary, RuntimeEvent};

/// Drives the [`Scheduler`] for one run of a flow graph.
///
/// Ready nodes are submitted to the dispatcher one decision at a time.
/// Waiting for each handle happens on a background task that reports back
/// through the event channel, so nodes submitted to a cluster progress
/// together while every state change is still applied on this loop.
pub struct Runtime<D: Dispatcher + ?Sized> {
    scheduler: Scheduler,
    dispatcher: Arc<D>,
    ctx: FlowContext,
    event_tx: mpsc::Sender<RuntimeEvent>,
    event_rx: mpsc::Receiver<RuntimeEvent>,
    /// Completions produced on this loop (submission failures).
    local_events: VecDeque<NodeCompletion>,
    in_flight: usize,
}

impl<D: Dispatcher + ?Sized> fmt::Debug for Runtime<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("scheduler", &self.scheduler)
            .field("jobname", &self.ctx.jobname)
            .field("in_flight", &self.in_flight)
            .finish_non_exhaustive()
    }
}

impl<D: Dispatcher + ?Sized + 'static> Runtime<D> {
    pub fn new(graph: FlowGraph, dispatcher: Arc<D>, ctx: FlowContext) -> Self {
        for id in graph.nodes() {
            if ctx.manifest.node(id).is_none() {
                ctx.manifest
                    .register_node(id, graph.dependencies_of(id).to_vec());
            }
        }
        let (event_tx, event_rx) = mpsc::channel(64);
        Self {
            scheduler: Scheduler::new(graph),
            dispatcher,
            ctx,
            event_tx,
            event_rx,
            local_events: VecDeque::new(),
            in_flight: 0,
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Run the graph until every node is terminal.
    pub async fn run(mut self) -> Result<RunSummary> {
        info!(
            job = %self.ctx.jobname,
            dispatcher = %self.dispatcher.kind(),
            nodes = self.scheduler.graph().len(),
            "flow run started"
        );

        let step = self.scheduler.step_start();
        self.apply_step(step).await;

        while !self.scheduler.is_finished() {
            let completion = match self.local_events.pop_front() {
                Some(c) => c,
                None if self.in_flight == 0 => {
                    return Err(FlowError::Dispatch(format!(
                        "run of '{}' stalled: nodes pending but none in flight",
                        self.ctx.jobname
                    )));
                }
                None => match self.event_rx.recv().await {
                    Some(RuntimeEvent::NodeCompleted(c)) => {
                        self.in_flight = self.in_flight.saturating_sub(1);
                        c
                    }
                    None => {
                        return Err(FlowError::Dispatch(
                            "runtime event channel closed before the run finished".to_string(),
                        ));
                    }
                },
            };

            debug!(node = %completion.node, status = ?completion.status, "runtime received completion");
            let step = self
                .scheduler
                .step_completion(&completion.node, completion.status);
            self.apply_step(step).await;
        }

        let summary = self.scheduler.summary(&self.ctx.jobname);
        info!(%summary, "flow run finished");
        Ok(summary)
    }

    async fn apply_step(&mut self, step: SchedulerStep) {
        for id in &step.newly_skipped {
            if let Err(err) = self.ctx.manifest.set_state(id, NodeState::Skipped) {
                warn!(node = %id, error = %err, "could not record skipped node");
            }
        }
        for node in step.newly_scheduled {
            self.dispatch(node).await;
        }
    }

    async fn dispatch(&mut self, node: ScheduledNode) {
        let id = node.id.clone();
        debug!(node = %id, tool = %node.spec.tool, "dispatching node");

        match self.dispatcher.submit(&self.ctx, node).await {
            Ok(handle) => {
                self.in_flight += 1;
                let dispatcher = Arc::clone(&self.dispatcher);
                let ctx = self.ctx.clone();
                let tx = self.event_tx.clone();
                tokio::spawn(async move {
                    let outcome = dispatcher.wait(&ctx, handle).await;
                    let completion = NodeCompletion {
                        node: outcome.node.clone(),
                        status: outcome.status,
                        error: outcome.error,
                    };
                    if tx.send(RuntimeEvent::NodeCompleted(completion)).await.is_err() {
                        debug!(node = %outcome.node, "runtime gone; dropping completion");
                    }
                });
            }
            Err(err) => {
                error!(node = %id, error = %err, "failed to dispatch node");
                let reason = err.to_string();
                if let Err(err) =
                    self.ctx
                        .manifest
                        .mark_finished(&id, NodeState::Failed, Some(reason.clone()))
                {
                    warn!(node = %id, error = %err, "could not record dispatch failure");
                }
                self.local_events.push_back(NodeCompletion {
                    node: id,
                    status: NodeStatus::Failed,
                    error: Some(reason),
                });
            }
        }
    }
}

/// Run `graph` to completion with `dispatcher` and return the summary.
pub async fn run_flow<D: Dispatcher + ?Sized + 'static>(
    graph: FlowGraph,
    dispatcher: Arc<D>,
    ctx: FlowContext,
) -> Result<RunSummary> {
    Runtime::new(graph, dispatcher, ctx).run().await
}
