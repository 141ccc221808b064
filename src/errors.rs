// src/errors.rs

//! Crate-wide error type and result alias.

use thiserror::Error;

use crate::types::NodeId;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Cycle detected in flow graph: {0}")]
    Cycle(String),

    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("Tool execution failed for {node}: {reason}")]
    ToolExecution { node: NodeId, reason: String },

    #[error("Refusing to record metric '{metric}' on skipped node {node}")]
    MetricOnSkipped { node: NodeId, metric: String },

    #[error("Dispatch error: {0}")]
    Dispatch(String),

    #[error("Search oracle unavailable: {0}")]
    OracleUnavailable(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FlowError {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        FlowError::Validation(msg.into())
    }

    pub(crate) fn tool(node: &NodeId, reason: impl Into<String>) -> Self {
        FlowError::ToolExecution {
            node: node.clone(),
            reason: reason.into(),
        }
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, FlowError>;
