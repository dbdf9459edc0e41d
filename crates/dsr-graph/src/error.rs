//! Error types for the graph store.

use crate::node::NodeId;
use thiserror::Error;

/// Errors that can occur in graph store operations.
#[derive(Error, Debug, Clone)]
pub enum GraphError {
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Edge not found: {from} -[{edge_type}]-> {to}")]
    EdgeNotFound {
        from: NodeId,
        to: NodeId,
        edge_type: String,
    },

    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("Name {name} is already bound to node {existing}")]
    NameConflict { name: String, existing: NodeId },

    #[error("Invalid node: {0}")]
    InvalidNode(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl GraphError {
    pub fn node_not_found(id: NodeId) -> Self {
        GraphError::NodeNotFound(id.to_string())
    }
}

impl From<serde_json::Error> for GraphError {
    fn from(err: serde_json::Error) -> Self {
        GraphError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for GraphError {
    fn from(err: std::io::Error) -> Self {
        GraphError::Io(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GraphError>;
