// src/dispatch/mod.rs

//! Pluggable node dispatchers.
//!
//! The runtime talks to a [`Dispatcher`] instead of running nodes itself.
//! Exactly one implementation is active per run, chosen by
//! `option.dispatcher`:
//!
//! - [`LocalDispatcher`] runs each node to completion inside `submit`.
//! - [`ClusterDispatcher`] writes a per-node batch script, submits it and
//!   polls the batch system in `wait`.
//!
//! Tests can provide their own implementation that never spawns processes.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::dag::ScheduledNode;
use crate::errors::Result;
use crate::exec::{FlowContext, NodeOutcome};
use crate::types::DispatcherKind;

pub mod cluster;
pub mod local;

pub use cluster::{ClusterDispatcher, ClusterJob, ClusterOptions, NodeTicket, run_ticket};
pub use local::LocalDispatcher;

/// Proof of submission returned by [`Dispatcher::submit`].
#[derive(Debug, Clone)]
pub enum DispatchHandle {
    /// The node already ran to completion.
    Completed(NodeOutcome),
    /// The node is queued on the cluster.
    Cluster(ClusterJob),
}

/// Trait abstracting how ready nodes are executed.
pub trait Dispatcher: Send + Sync {
    fn kind(&self) -> DispatcherKind;

    /// Hand a ready node over for execution.
    ///
    /// An error means the node could not be started at all; the runtime
    /// marks it `Failed` without retrying.
    fn submit<'a>(
        &'a self,
        ctx: &'a FlowContext,
        node: ScheduledNode,
    ) -> Pin<Box<dyn Future<Output = Result<DispatchHandle>> + Send + 'a>>;

    /// Wait until the node behind `handle` has finished.
    fn wait<'a>(
        &'a self,
        ctx: &'a FlowContext,
        handle: DispatchHandle,
    ) -> Pin<Box<dyn Future<Output = NodeOutcome> + Send + 'a>>;
}

/// Dispatcher selected by `kind`.
pub fn dispatcher_for(kind: DispatcherKind, cluster: ClusterOptions) -> Result<Arc<dyn Dispatcher>> {
    Ok(match kind {
        DispatcherKind::Local => Arc::new(LocalDispatcher),
        DispatcherKind::Cluster => Arc::new(ClusterDispatcher::new(cluster)?),
    })
}
