// src/exec/mod.rs

//! Node execution layer.
//!
//! - [`adapter`] defines the [`ToolAdapter`] interface and the
//!   [`AdapterRegistry`] resolving a node's `tool` to an adapter.
//! - [`shell`] is the generic adapter for command-line tools.
//! - [`builtin`] holds `nop` and the input selectors.
//! - [`executor`] runs one node in its work directory and records the
//!   outcome in the manifest.
//! - [`context`] carries per-job settings shared by all of the above.

pub mod adapter;
pub mod builtin;
pub mod context;
pub mod executor;
pub mod shell;

pub use adapter::{AdapterRegistry, Invocation, NodeTask, Selector, ToolAdapter};
pub use context::FlowContext;
pub use executor::{NodeExecutor, NodeOutcome, compute_file_hash};
