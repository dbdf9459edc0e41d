//! Error types for replication.

use crate::network::NetworkError;
use dsr_graph::GraphError;
use std::time::Duration;
use thiserror::Error;

/// Error type for replica and protocol operations.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("No full graph received within {0:?}")]
    Timeout(Duration),

    #[error("Channel closed: {0}")]
    ChannelClosed(&'static str),
}

impl From<NetworkError> for SyncError {
    fn from(err: NetworkError) -> Self {
        SyncError::Transport(err.to_string())
    }
}

/// Result type for replica operations.
pub type Result<T> = std::result::Result<T, SyncError>;
