//! DSR Sync - replication engine for the Deep State Representation graph
//!
//! Every agent holds a full replica of the graph. Local mutations are applied
//! immediately and their deltas published; remote deltas are joined by a
//! single merge task. A joining agent asks its peers for the full graph and
//! goes steady once an answer has been joined (or, with nobody around, once
//! its requests time out).
//!
//! # Quick Start
//!
//! ```rust
//! use dsr_graph::Node;
//! use dsr_sync::{DsrGraph, MemoryBus, ReplicaConfigBuilder};
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> dsr_sync::Result<()> {
//! let bus = MemoryBus::new();
//! let config = ReplicaConfigBuilder::new(1, "world-builder")
//!     .sync_timeout(100)
//!     .sync_attempts(1)
//!     .build();
//! let graph = DsrGraph::start(config, Arc::new(bus.transport("world-builder"))).await?;
//!
//! assert!(graph.insert_or_assign_node(Node::new(1, "world", "world")));
//! assert_eq!(graph.get_id_from_name("world"), Some(1));
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - [`replica`] - The replica handle and its local mutation path
//! - `inbound` - Subscription tasks and the merge task
//! - [`anti_entropy`] - Startup full-graph synchronization
//! - [`network`] - Pub/sub transport abstraction and an in-memory bus
//! - [`message`] - Wire messages
//! - [`observer`] - Graph event fan-out
//! - [`config`] - Replica configuration
//! - [`error`] - Error types

pub mod anti_entropy;
pub mod config;
pub mod error;
mod inbound;
pub mod message;
pub mod network;
pub mod observer;
pub mod replica;

pub use anti_entropy::SyncState;
pub use config::{ReplicaConfig, ReplicaConfigBuilder};
pub use error::{Result, SyncError};
pub use message::{DeltaMessage, GraphAnswer, GraphRequest};
pub use network::{
    create_network, Envelope, MemoryBus, MemoryTransport, NetworkError, PeerId, Topic, Transport,
};
pub use observer::EventBus;
pub use replica::DsrGraph;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::anti_entropy::SyncState;
    pub use crate::config::{ReplicaConfig, ReplicaConfigBuilder};
    pub use crate::error::SyncError;
    pub use crate::network::{MemoryBus, PeerId, Transport};
    pub use crate::replica::DsrGraph;
    pub use dsr_graph::{Edge, GraphEvent, Node, NodeId, Value};
}
