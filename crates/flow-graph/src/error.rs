//! Error types for the flow graph core

use thiserror::Error;

/// Result type alias using FlowGraphError
pub type Result<T> = std::result::Result<T, FlowGraphError>;

/// Errors that can occur while maintaining a flow graph
#[derive(Debug, Error)]
pub enum FlowGraphError {
    /// The actor is not allowed to edit this flow
    #[error("Permission denied: cannot {action} without edit rights")]
    PermissionDenied { action: String },

    /// A referenced node does not exist
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// A referenced edge does not exist
    #[error("Edge not found: {0}")]
    EdgeNotFound(String),

    /// A flow document is not in the store
    #[error("Flow not found: {0}")]
    FlowNotFound(String),

    /// A flow document has no version at the requested index
    #[error("Flow '{flow_id}' has no version {index}")]
    VersionNotFound { flow_id: String, index: usize },

    /// The graph (or a proposed edit) is structurally invalid
    #[error("Invalid graph: {0}")]
    InvalidGraph(String),

    /// Sub-flow expansion did not reach a fixed point
    #[error("Sub-flow flattening did not converge after {passes} passes")]
    FlattenLimitExceeded { passes: usize },

    /// The execution backend rejected or failed a submission
    #[error("Submission error: {0}")]
    Submission(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Compression error
    #[error("Compression error: {0}")]
    Compression(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FlowGraphError {
    /// Create a permission error for the given action
    pub fn permission_denied(action: impl Into<String>) -> Self {
        Self::PermissionDenied {
            action: action.into(),
        }
    }

    /// Create an invalid graph error with a message
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidGraph(msg.into())
    }
}
