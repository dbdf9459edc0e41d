//! Nodes and edges of the DSR graph.
//!
//! A node owns its outgoing edges (its "fano"). Each edge, like each
//! attribute, lives in a multi-value register so concurrent writes from
//! different agents are kept side by side until one of them is overwritten.

use crate::attribute::{stamp_registers, AttributeMap, AttributeType, Value, UNSTAMPED};
use crate::error::Result;
use dsr_core::{AgentId, DotContext, Lattice, MvRegister};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Externally allocated node identifier. `0` is reserved for the root.
pub type NodeId = i32;

/// Key of an edge inside its source node.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EdgeKey {
    pub to: NodeId,
    pub edge_type: String,
}

impl EdgeKey {
    pub fn new(to: NodeId, edge_type: impl Into<String>) -> Self {
        Self {
            to,
            edge_type: edge_type.into(),
        }
    }
}

/// A typed, directed edge.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub from: NodeId,
    pub to: NodeId,
    pub edge_type: String,
    pub agent_id: AgentId,
    pub attrs: AttributeMap,
}

impl Edge {
    pub fn new(from: NodeId, to: NodeId, edge_type: impl Into<String>) -> Self {
        Self {
            from,
            to,
            edge_type: edge_type.into(),
            agent_id: 0,
            attrs: AttributeMap::new(),
        }
    }

    pub fn key(&self) -> EdgeKey {
        EdgeKey::new(self.to, self.edge_type.clone())
    }

    pub fn attribute<T: AttributeType>(&self, key: &str) -> Result<Option<T>> {
        self.attrs.get_as(key)
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.attrs.set(key, value);
    }
}

/// A graph node: identity, attributes and outgoing edges.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub node_type: String,
    pub name: String,
    /// Agent that wrote this snapshot.
    pub agent_id: AgentId,
    pub attrs: AttributeMap,
    #[serde(with = "dsr_core::pairs")]
    pub fano: BTreeMap<EdgeKey, MvRegister<Edge>>,
}

impl Node {
    pub fn new(id: NodeId, node_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id,
            node_type: node_type.into(),
            name: name.into(),
            agent_id: 0,
            attrs: AttributeMap::new(),
            fano: BTreeMap::new(),
        }
    }

    // === Attributes ===

    pub fn attribute<T: AttributeType>(&self, key: &str) -> Result<Option<T>> {
        self.attrs.get_as(key)
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.attrs.set(key, value);
    }

    pub fn remove_attribute(&mut self, key: &str) -> bool {
        self.attrs.remove(key)
    }

    // === Edges ===

    /// The visible edge to `to` with type `edge_type`.
    pub fn edge(&self, to: NodeId, edge_type: &str) -> Option<&Edge> {
        self.fano
            .get(&EdgeKey::new(to, edge_type))
            .and_then(resolve_edge)
    }

    /// Visible outgoing edges, one per key.
    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.fano.values().filter_map(resolve_edge)
    }

    /// Write an edge into the fano, superseding concurrent versions observed.
    pub fn put_edge(&mut self, edge: Edge) {
        self.fano
            .entry(edge.key())
            .or_default()
            .write(UNSTAMPED, edge);
    }

    pub fn remove_edge(&mut self, to: NodeId, edge_type: &str) -> bool {
        self.fano
            .remove(&EdgeKey::new(to, edge_type))
            .is_some_and(|reg| !reg.is_empty())
    }

    /// Fold a concurrent snapshot of the same node into this one.
    pub(crate) fn merge_concurrent(&mut self, other: &Node) {
        self.attrs.merge(&other.attrs);
        for (key, reg) in &other.fano {
            self.fano
                .entry(key.clone())
                .or_default()
                .join_assign(reg);
        }
    }

    /// Give every write this node holds beyond `base` a dot from the store
    /// context, and mask what it dropped.
    pub(crate) fn stamp(&mut self, base: Option<&Node>, context: &mut DotContext, agent_id: AgentId) {
        self.attrs.stamp(base.map(|b| &b.attrs), context, agent_id);

        let empty = BTreeMap::new();
        let base_fano = base.map_or(&empty, |b| &b.fano);
        stamp_registers(&mut self.fano, base_fano, context, agent_id, |edge, old, context| {
            edge.agent_id = agent_id;
            let old_edge = old.and_then(resolve_edge);
            edge.attrs.stamp(old_edge.map(|e| &e.attrs), context, agent_id);
        });
    }

    /// Drop removal masks and every edge whose target fails `live`.
    pub(crate) fn retain_visible(&mut self, live: impl Fn(NodeId) -> bool) {
        self.attrs.drop_masks();
        self.fano.retain(|key, reg| !reg.is_empty() && live(key.to));
    }
}

// Concurrent versions of one edge are shown as the one with the greatest dot.
fn resolve_edge(reg: &MvRegister<Edge>) -> Option<&Edge> {
    reg.read_with_dots().next_back().map(|(_, edge)| edge)
}
