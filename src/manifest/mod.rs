// src/manifest/mod.rs

//! Per-node records of inputs, outputs and metrics, plus the versioned job
//! history.
//!
//! - [`record`] holds the serializable document types.
//! - [`store`] provides [`ManifestStore`], the shared handle every
//!   component records through.

pub mod record;
pub mod store;

pub use record::{
    JobSnapshot, MANIFEST_VERSION, Manifest, MetricEntry, NodeRecord, NodeTable, OutputFile,
};
pub use store::ManifestStore;
