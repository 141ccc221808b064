// src/config/mod.rs

//! Flow-file loading and validation.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a flow file from disk (`loader.rs`).
//! - Validate it and build the [`FlowGraph`](crate::dag::FlowGraph)
//!   (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path, load_from_str};
pub use model::{FlowConfig, NodeConfig, OptimizeSection, OptionSection, RawFlowConfig};
pub use validate::validate_config;
