//! # dsr-graph
//!
//! The replicated property graph of the Deep State Representation (DSR).
//!
//! This crate provides:
//! - Nodes and typed edges with multi-value attributes
//! - A CRDT graph store (observed-remove map of node snapshots) producing
//!   shippable deltas for every local mutation
//! - Name, type and edge indices kept exactly in step with the visible graph
//! - Delta and full-state merges for replication and anti-entropy
//! - JSON import/export of the whole graph
//!
//! ## Example
//!
//! ```rust
//! use dsr_graph::{Edge, GraphStore, Node};
//!
//! let mut store = GraphStore::new(1);
//! store.insert_or_assign_node(Node::new(1, "world", "world")).unwrap();
//! store.insert_or_assign_node(Node::new(2, "robot", "robot")).unwrap();
//! let mutation = store.insert_or_assign_edge(Edge::new(1, 2, "RT")).unwrap();
//!
//! // ship `mutation.deltas` to the other replicas
//! let mut remote = GraphStore::new(2);
//! remote.join_full_graph(&store.export_state());
//! assert!(remote.get_edge(1, 2, "RT").is_some());
//! # let _ = mutation;
//! ```

pub mod attribute;
pub mod error;
pub mod events;
pub mod index;
pub mod node;
pub mod persist;
pub mod store;

pub use attribute::{Attribute, AttributeMap, AttributeType, Value};
pub use error::{GraphError, Result};
pub use events::GraphEvent;
pub use node::{Edge, EdgeKey, Node, NodeId};
pub use persist::{DsrFile, DsrModel};
pub use store::{GraphState, GraphStore, Mutation, NodeDelta};
