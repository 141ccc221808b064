// src/dispatch/local.rs

use std::future::Future;
use std::pin::Pin;

use tracing::warn;

use crate::dag::ScheduledNode;
use crate::dispatch::{DispatchHandle, Dispatcher};
use crate::errors::Result;
use crate::exec::{FlowContext, NodeExecutor, NodeOutcome};
use crate::types::{DispatcherKind, NodeState};

/// Runs nodes on the local host.
///
/// `submit` blocks until the node has finished and the manifest is
/// up to date, so `wait` only unwraps the result.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalDispatcher;

impl Dispatcher for LocalDispatcher {
    fn kind(&self) -> DispatcherKind {
        DispatcherKind::Local
    }

    fn submit<'a>(
        &'a self,
        ctx: &'a FlowContext,
        node: ScheduledNode,
    ) -> Pin<Box<dyn Future<Output = Result<DispatchHandle>> + Send + 'a>> {
        Box::pin(async move {
            let outcome = NodeExecutor::new(ctx).run(&node).await;
            Ok(DispatchHandle::Completed(outcome))
        })
    }

    fn wait<'a>(
        &'a self,
        ctx: &'a FlowContext,
        handle: DispatchHandle,
    ) -> Pin<Box<dyn Future<Output = NodeOutcome> + Send + 'a>> {
        Box::pin(async move {
            match handle {
                DispatchHandle::Completed(outcome) => outcome,
                DispatchHandle::Cluster(job) => {
                    let reason =
                        format!("local dispatcher cannot wait for cluster job {}", job.job_id);
                    if let Err(err) =
                        ctx.manifest
                            .mark_finished(&job.node, NodeState::Failed, Some(reason.clone()))
                    {
                        warn!(node = %job.node, error = %err, "could not record failed wait");
                    }
                    NodeOutcome::failed(job.node, reason)
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;

    use super::*;
    use crate::dispatch::ClusterJob;
    use crate::engine::NodeStatus;
    use crate::exec::AdapterRegistry;
    use crate::manifest::ManifestStore;
    use crate::types::NodeId;

    fn job(step: &str) -> DispatchHandle {
        DispatchHandle::Cluster(ClusterJob {
            node: NodeId::new(step, 0),
            job_id: "77".to_string(),
            workdir: PathBuf::from("/nonexistent"),
        })
    }

    #[tokio::test]
    async fn cluster_handles_fail_the_node() {
        let manifest = ManifestStore::new("gcd", "job0");
        let syn = NodeId::new("syn", 0);
        manifest.register_node(&syn, vec![]);
        let ctx = FlowContext::new("/tmp", manifest.clone(), Arc::new(AdapterRegistry::with_builtins().unwrap()));

        let outcome = LocalDispatcher.wait(&ctx, job("syn")).await;
        assert_eq!(outcome.status, NodeStatus::Failed);
        assert_eq!(manifest.state_of(&syn), Some(NodeState::Failed));

        // Nodes missing from the manifest still produce an outcome.
        let outcome = LocalDispatcher.wait(&ctx, job("ghost")).await;
        assert_eq!(outcome.status, NodeStatus::Failed);
        assert!(outcome.error.unwrap().contains("77"));
    }
}
