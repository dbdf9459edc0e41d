//! Lookup caches derived from the visible node set.
//!
//! The index is never authoritative: it is rebuilt entry by entry from the
//! node view every time a node changes, inside the same exclusive section as
//! the change itself.

use crate::node::{Node, NodeId};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Clone, Debug, Default)]
pub struct GraphIndex {
    /// Concurrent inserts can leave one name on several ids; the smallest wins.
    name_to_ids: BTreeMap<String, BTreeSet<NodeId>>,
    id_to_name: BTreeMap<NodeId, String>,
    nodes_by_type: BTreeMap<String, BTreeSet<NodeId>>,
    edges_by_type: BTreeMap<String, BTreeSet<(NodeId, NodeId)>>,
    /// (from, to) → edge types between them.
    edges: BTreeMap<(NodeId, NodeId), BTreeSet<String>>,
    /// to → {(from, edge type)}.
    incoming: BTreeMap<NodeId, BTreeSet<(NodeId, String)>>,
}

impl GraphIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, node: &Node) {
        self.name_to_ids
            .entry(node.name.clone())
            .or_default()
            .insert(node.id);
        self.id_to_name.insert(node.id, node.name.clone());
        self.nodes_by_type
            .entry(node.node_type.clone())
            .or_default()
            .insert(node.id);

        for edge in node.edges() {
            self.edges_by_type
                .entry(edge.edge_type.clone())
                .or_default()
                .insert((edge.from, edge.to));
            self.edges
                .entry((edge.from, edge.to))
                .or_default()
                .insert(edge.edge_type.clone());
            self.incoming
                .entry(edge.to)
                .or_default()
                .insert((edge.from, edge.edge_type.clone()));
        }
    }

    pub fn remove(&mut self, node: &Node) {
        remove_from(&mut self.name_to_ids, &node.name, &node.id);
        self.id_to_name.remove(&node.id);
        remove_from(&mut self.nodes_by_type, &node.node_type, &node.id);

        for edge in node.edges() {
            remove_from(&mut self.edges_by_type, &edge.edge_type, &(edge.from, edge.to));
            remove_from(&mut self.edges, &(edge.from, edge.to), &edge.edge_type);
            remove_from(
                &mut self.incoming,
                &edge.to,
                &(edge.from, edge.edge_type.clone()),
            );
        }
    }

    /// The smallest live id carrying `name`.
    pub fn id_of(&self, name: &str) -> Option<NodeId> {
        self.name_to_ids
            .get(name)
            .and_then(|ids| ids.iter().next().copied())
    }

    pub fn carries_name(&self, id: NodeId, name: &str) -> bool {
        self.name_to_ids
            .get(name)
            .is_some_and(|ids| ids.contains(&id))
    }

    pub fn name_of(&self, id: NodeId) -> Option<&str> {
        self.id_to_name.get(&id).map(String::as_str)
    }

    pub fn nodes_of_type(&self, node_type: &str) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes_by_type
            .get(node_type)
            .into_iter()
            .flat_map(|ids| ids.iter().copied())
    }

    pub fn edges_of_type(&self, edge_type: &str) -> impl Iterator<Item = (NodeId, NodeId)> + '_ {
        self.edges_by_type
            .get(edge_type)
            .into_iter()
            .flat_map(|pairs| pairs.iter().copied())
    }

    pub fn edge_types_between(&self, from: NodeId, to: NodeId) -> impl Iterator<Item = &str> {
        self.edges
            .get(&(from, to))
            .into_iter()
            .flat_map(|types| types.iter().map(String::as_str))
    }

    /// Every `(from, edge type)` with an edge pointing at `to`.
    pub fn incoming(&self, to: NodeId) -> impl Iterator<Item = (NodeId, &str)> {
        self.incoming
            .get(&to)
            .into_iter()
            .flat_map(|set| set.iter().map(|(from, t)| (*from, t.as_str())))
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

fn remove_from<K: Ord, V: Ord>(map: &mut BTreeMap<K, BTreeSet<V>>, key: &K, value: &V) {
    if let Some(set) = map.get_mut(key) {
        set.remove(value);
        if set.is_empty() {
            map.remove(key);
        }
    }
}
