#![allow(dead_code)]

pub use flowdag_test_utils::builders;
pub use flowdag_test_utils::fake_dispatcher::FakeDispatcher;
pub use flowdag_test_utils::{init_tracing, with_timeout};

use std::path::Path;
use std::sync::Arc;

use flowdag::dag::FlowGraph;
use flowdag::exec::{AdapterRegistry, FlowContext};
use flowdag::manifest::ManifestStore;

/// Context for `graph` with a fresh manifest and the built-in adapters.
pub fn context_for(builddir: &Path, design: &str, jobname: &str, graph: &FlowGraph) -> FlowContext {
    let manifest = ManifestStore::for_graph(design, jobname, graph);
    let adapters = Arc::new(AdapterRegistry::with_builtins().expect("builtin adapters"));
    FlowContext::new(builddir, manifest, adapters)
}
