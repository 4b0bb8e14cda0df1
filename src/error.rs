//! Error types for the pool operator

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the pool operator
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Kubernetes watch stream error
    #[error("Kubernetes watch error: {0}")]
    Watch(#[from] kube::runtime::watcher::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Transport error talking to the control plane
    #[error("Control plane request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// A node rejected or failed a pool operation
    #[error("{operation} on node {node} failed: {reason}")]
    NodeOperation {
        node: String,
        operation: String,
        reason: String,
    },

    /// Node is not known to the registry
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// Pool resource is not in the store
    #[error("Pool resource not found: {0}")]
    ResourceNotFound(String),

    /// Pool resource failed validation
    #[error("Invalid pool resource: {0}")]
    Validation(#[from] ValidationError),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build a node operation error
    pub fn node_operation(
        node: impl Into<String>,
        operation: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Error::NodeOperation {
            node: node.into(),
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Check if the error means the object does not exist
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Kube(kube::Error::Api(e)) => e.code == 404,
            Error::NodeNotFound(_) | Error::ResourceNotFound(_) => true,
            _ => false,
        }
    }
}

/// Reasons a pool resource is rejected before it enters the pipeline
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("pool resource has no name")]
    MissingName,

    #[error("pool resource {0} does not name a node")]
    MissingNode(String),
}
