//! The CRDT-backed graph store.
//!
//! All nodes live in one observed-remove map: node id → dot kernel of node
//! snapshots, with a single causal context shared by every kernel. Writing a
//! node replaces every snapshot this replica has observed with a new one under
//! a fresh dot; deleting a node drops its snapshots while the shared context
//! keeps their dots, so late deliveries of older writes cannot resurrect it.
//!
//! Replicas that wrote the same node concurrently leave one snapshot each in
//! its history. The visible node is the snapshot with the greatest dot, with
//! the attribute and edge registers of the other snapshots joined in, minus
//! removal masks and edges pointing at nodes with no history.
//!
//! Attribute and edge writes take their dots from the same shared context as
//! node snapshots, so no dot is ever issued twice by one replica.
//!
//! The store does no locking and no I/O on its own; the replica wraps it in a
//! single lock and ships the returned deltas.

use crate::attribute::Value;
use crate::error::{GraphError, Result};
use crate::events::{diff, GraphEvent};
use crate::index::GraphIndex;
use crate::node::{Edge, Node, NodeId};
use dsr_core::{AgentId, AworSet, Dot, DotContext, DotKernel, Lattice};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, trace};

/// A delta for one node: the snapshots it adds plus the dots it has seen.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeDelta {
    pub id: NodeId,
    pub delta: AworSet<Node>,
}

/// Result of a local mutation: deltas to ship and events to notify.
#[derive(Clone, Debug, Default)]
pub struct Mutation {
    pub deltas: Vec<NodeDelta>,
    pub events: Vec<GraphEvent>,
}

impl Mutation {
    /// Nothing changed.
    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }

    pub fn extend(&mut self, other: Mutation) {
        self.deltas.extend(other.deltas);
        self.events.extend(other.events);
    }
}

/// The full replicated state: every node history plus the shared context.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphState {
    pub context: DotContext,
    pub nodes: BTreeMap<NodeId, DotKernel<Node>>,
}

/// A replica's graph store.
#[derive(Clone, Debug)]
pub struct GraphStore {
    agent_id: AgentId,
    context: DotContext,
    nodes: BTreeMap<NodeId, DotKernel<Node>>,
    /// Node view per id, kept in step with `nodes`.
    visible: BTreeMap<NodeId, Node>,
    index: GraphIndex,
}

impl GraphStore {
    pub fn new(agent_id: AgentId) -> Self {
        Self {
            agent_id,
            context: DotContext::new(),
            nodes: BTreeMap::new(),
            visible: BTreeMap::new(),
            index: GraphIndex::new(),
        }
    }

    pub fn agent_id(&self) -> AgentId {
        self.agent_id
    }

    /// Every dot this replica has observed.
    pub fn context(&self) -> &DotContext {
        &self.context
    }

    /// The raw snapshot history of a node.
    pub fn history(&self, id: NodeId) -> Option<&DotKernel<Node>> {
        self.nodes.get(&id)
    }

    // === Node queries ===

    pub fn size(&self) -> usize {
        self.visible.len()
    }

    pub fn is_empty(&self) -> bool {
        self.visible.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.visible.contains_key(&id)
    }

    pub fn get_node(&self, id: NodeId) -> Option<Node> {
        self.visible.get(&id).cloned()
    }

    pub fn get_node_by_name(&self, name: &str) -> Option<Node> {
        self.index.id_of(name).and_then(|id| self.get_node(id))
    }

    /// Copy of every visible node.
    pub fn nodes(&self) -> Vec<Node> {
        self.visible.values().cloned().collect()
    }

    pub fn ids(&self) -> Vec<NodeId> {
        self.visible.keys().copied().collect()
    }

    pub fn get_name_from_id(&self, id: NodeId) -> Option<String> {
        self.index.name_of(id).map(str::to_string)
    }

    pub fn get_id_from_name(&self, name: &str) -> Option<NodeId> {
        self.index.id_of(name)
    }

    pub fn get_nodes_by_type(&self, node_type: &str) -> Vec<Node> {
        self.index
            .nodes_of_type(node_type)
            .filter_map(|id| self.get_node(id))
            .collect()
    }

    /// Depth of a node below the root, from its `level` attribute.
    pub fn get_node_level(&self, id: NodeId) -> Option<i32> {
        self.visible
            .get(&id)
            .and_then(|node| node.attribute::<i32>("level").ok().flatten())
    }

    // === Edge queries ===
    //
    // Edges whose target is not visible are never reported.

    pub fn get_edge(&self, from: NodeId, to: NodeId, edge_type: &str) -> Option<Edge> {
        if !self.contains(to) {
            return None;
        }
        self.visible
            .get(&from)
            .and_then(|node| node.edge(to, edge_type))
            .cloned()
    }

    pub fn get_edge_by_name(&self, from: &str, to: &str, edge_type: &str) -> Option<Edge> {
        let from = self.index.id_of(from)?;
        let to = self.index.id_of(to)?;
        self.get_edge(from, to, edge_type)
    }

    /// Outgoing edges of `id`.
    pub fn get_edges(&self, id: NodeId) -> Vec<Edge> {
        self.visible
            .get(&id)
            .map(|node| {
                node.edges()
                    .filter(|e| self.contains(e.to))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn get_edges_by_type(&self, edge_type: &str) -> Vec<Edge> {
        self.index
            .edges_of_type(edge_type)
            .filter_map(|(from, to)| self.get_edge(from, to, edge_type))
            .collect()
    }

    /// Edges pointing at `id`.
    pub fn get_edges_to_id(&self, id: NodeId) -> Vec<Edge> {
        self.index
            .incoming(id)
            .filter_map(|(from, edge_type)| self.get_edge(from, id, edge_type))
            .collect()
    }

    // === Local mutations ===

    /// Create or replace a node.
    ///
    /// Writing back exactly the visible node is a no-op.
    pub fn insert_or_assign_node(&mut self, node: Node) -> Result<Mutation> {
        validate(&node)?;
        if let Some(existing) = self.index.id_of(&node.name) {
            if !self.index.carries_name(node.id, &node.name) {
                return Err(GraphError::NameConflict {
                    name: node.name,
                    existing,
                });
            }
        }
        if self.visible.get(&node.id) == Some(&node) {
            trace!(id = node.id, "node unchanged");
            return Ok(Mutation::default());
        }
        Ok(self.write_node(node))
    }

    /// Delete a node, its outgoing edges and every edge pointing at it.
    pub fn delete_node(&mut self, id: NodeId) -> Result<Mutation> {
        let history = self
            .nodes
            .get_mut(&id)
            .ok_or_else(|| GraphError::node_not_found(id))?;
        let (kernel, context) = history.clear();
        self.nodes.remove(&id);

        let sources: BTreeSet<NodeId> = self
            .index
            .incoming(id)
            .map(|(from, _)| from)
            .filter(|from| *from != id)
            .collect();

        // Refreshing hides the inbound edges; rewriting each source masks them.
        let mut mutation = Mutation {
            deltas: vec![NodeDelta {
                id,
                delta: AworSet::from_parts(kernel, context),
            }],
            events: self.refresh(id),
        };
        for from in sources {
            if let Some(node) = self.visible.get(&from).cloned() {
                mutation.extend(self.write_node(node));
            }
        }

        debug!(id, deltas = mutation.deltas.len(), "node deleted");
        Ok(mutation)
    }

    pub fn delete_node_by_name(&mut self, name: &str) -> Result<Mutation> {
        let id = self
            .index
            .id_of(name)
            .ok_or_else(|| GraphError::NodeNotFound(name.to_string()))?;
        self.delete_node(id)
    }

    /// Create or replace an edge. Both endpoints must exist.
    pub fn insert_or_assign_edge(&mut self, mut edge: Edge) -> Result<Mutation> {
        let mut node = self
            .get_node(edge.from)
            .ok_or_else(|| GraphError::node_not_found(edge.from))?;
        if !self.contains(edge.to) {
            return Err(GraphError::node_not_found(edge.to));
        }
        edge.agent_id = self.agent_id;
        if node.edge(edge.to, &edge.edge_type) == Some(&edge) {
            return Ok(Mutation::default());
        }
        node.put_edge(edge);
        Ok(self.write_node(node))
    }

    pub fn delete_edge(&mut self, from: NodeId, to: NodeId, edge_type: &str) -> Result<Mutation> {
        let mut node = self
            .get_node(from)
            .ok_or_else(|| GraphError::node_not_found(from))?;
        if !node.remove_edge(to, edge_type) {
            return Err(GraphError::EdgeNotFound {
                from,
                to,
                edge_type: edge_type.to_string(),
            });
        }
        Ok(self.write_node(node))
    }

    pub fn delete_edge_by_name(&mut self, from: &str, to: &str, edge_type: &str) -> Result<Mutation> {
        let from = self
            .index
            .id_of(from)
            .ok_or_else(|| GraphError::NodeNotFound(from.to_string()))?;
        let to = self
            .index
            .id_of(to)
            .ok_or_else(|| GraphError::NodeNotFound(to.to_string()))?;
        self.delete_edge(from, to, edge_type)
    }

    /// Delete every edge from `from` to `to`, whatever its type.
    pub fn delete_edges(&mut self, from: NodeId, to: NodeId) -> Result<Mutation> {
        let mut node = self
            .get_node(from)
            .ok_or_else(|| GraphError::node_not_found(from))?;
        let edge_types: Vec<String> = self
            .index
            .edge_types_between(from, to)
            .map(str::to_string)
            .collect();
        if edge_types.is_empty() {
            return Err(GraphError::EdgeNotFound {
                from,
                to,
                edge_type: "*".to_string(),
            });
        }
        for edge_type in &edge_types {
            node.remove_edge(to, edge_type);
        }
        Ok(self.write_node(node))
    }

    /// Set one attribute of a node.
    pub fn update_attribute(
        &mut self,
        id: NodeId,
        key: &str,
        value: impl Into<Value>,
    ) -> Result<Mutation> {
        let mut node = self
            .get_node(id)
            .ok_or_else(|| GraphError::node_not_found(id))?;
        node.set_attribute(key, value);
        Ok(self.write_node(node))
    }

    // === Remote merges ===

    /// Join a delta received from another replica.
    pub fn join_delta(&mut self, delta: &NodeDelta) -> Vec<GraphEvent> {
        let id = delta.id;
        let changed = self.join_history(id, delta.delta.kernel(), delta.delta.context());
        self.context.join_assign(delta.delta.context());
        if changed {
            trace!(id, "delta joined");
            self.refresh(id)
        } else {
            Vec::new()
        }
    }

    /// Join another replica's full state.
    pub fn join_full_graph(&mut self, state: &GraphState) -> Vec<GraphEvent> {
        let ids: BTreeSet<NodeId> = self
            .nodes
            .keys()
            .chain(state.nodes.keys())
            .copied()
            .collect();
        let empty = DotKernel::new();

        let mut touched = Vec::new();
        for id in ids {
            let remote = state.nodes.get(&id).unwrap_or(&empty);
            if self.join_history(id, remote, &state.context) {
                touched.push(id);
            }
        }
        self.context.join_assign(&state.context);

        debug!(nodes = touched.len(), "full graph joined");
        let mut events = Vec::new();
        for id in touched {
            events.extend(self.refresh(id));
        }
        events
    }

    /// Copy of the full replicated state, for answering a late joiner.
    pub fn export_state(&self) -> GraphState {
        GraphState {
            context: self.context.clone(),
            nodes: self.nodes.clone(),
        }
    }

    // === Internals ===

    fn join_history(
        &mut self,
        id: NodeId,
        remote: &DotKernel<Node>,
        remote_context: &DotContext,
    ) -> bool {
        let history = self.nodes.entry(id).or_default();
        let changed = history.join_with(&self.context, remote, remote_context);
        if history.is_empty() {
            self.nodes.remove(&id);
        }
        changed
    }

    /// Replace every observed snapshot of `node.id` with `node`.
    fn write_node(&mut self, mut node: Node) -> Mutation {
        let id = node.id;
        node.agent_id = self.agent_id;
        let base = self.nodes.get(&id).and_then(merged);
        let first = self.context.max_seen(self.agent_id);
        node.stamp(base.as_ref(), &mut self.context, self.agent_id);
        let last = self.context.max_seen(self.agent_id);

        let history = self.nodes.entry(id).or_default();
        let (kernel, mut context) = history.assign(&mut self.context, self.agent_id, node);
        // peers must learn the register dots too
        for counter in first + 1..=last {
            context.insert_dot(Dot::new(self.agent_id, counter));
        }
        Mutation {
            deltas: vec![NodeDelta {
                id,
                delta: AworSet::from_parts(kernel, context),
            }],
            events: self.refresh(id),
        }
    }

    /// Recompute the view of `id` and bring the caches in line with it.
    ///
    /// When `id` appears or disappears, every node holding an edge to it is
    /// refreshed too.
    fn refresh(&mut self, id: NodeId) -> Vec<GraphEvent> {
        let before = self.visible.remove(&id);
        let after = self.nodes.get(&id).and_then(merged).map(|mut node| {
            node.retain_visible(|to| self.nodes.contains_key(&to));
            node
        });

        if let Some(old) = &before {
            self.index.remove(old);
        }
        if let Some(new) = &after {
            self.index.insert(new);
        }

        let mut events = diff(id, before.as_ref(), after.as_ref());
        let toggled = before.is_some() != after.is_some();
        if let Some(new) = after {
            self.visible.insert(id, new);
        }

        if toggled {
            let sources: Vec<NodeId> = self
                .nodes
                .iter()
                .filter(|(from, history)| {
                    **from != id && history.values().any(|n| n.fano.keys().any(|k| k.to == id))
                })
                .map(|(from, _)| *from)
                .collect();
            for from in sources {
                events.extend(self.refresh(from));
            }
        }
        events
    }
}

/// Every snapshot of a history folded into one node: the greatest-dot
/// snapshot with the registers of every concurrent snapshot joined in.
fn merged(history: &DotKernel<Node>) -> Option<Node> {
    let mut snapshots = history.values().rev();
    let mut node = snapshots.next()?.clone();
    for other in snapshots {
        node.merge_concurrent(other);
    }
    Some(node)
}

fn validate(node: &Node) -> Result<()> {
    if node.name.is_empty() {
        return Err(GraphError::InvalidNode(format!("node {} has no name", node.id)));
    }
    if node.node_type.is_empty() {
        return Err(GraphError::InvalidNode(format!("node {} has no type", node.id)));
    }
    if let Some(edge) = node.edges().find(|e| e.from != node.id) {
        return Err(GraphError::InvalidNode(format!(
            "node {} holds an edge from {}",
            node.id, edge.from
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_world(agent: AgentId) -> GraphStore {
        let mut store = GraphStore::new(agent);
        store
            .insert_or_assign_node(Node::new(1, "world", "world"))
            .unwrap();
        store
    }

    #[test]
    fn test_insert_and_get() {
        let store = store_with_world(1);
        let node = store.get_node(1).unwrap();
        assert_eq!(node.name, "world");
        assert_eq!(node.agent_id, 1);
        assert_eq!(store.get_id_from_name("world"), Some(1));
        assert_eq!(store.get_name_from_id(1).as_deref(), Some("world"));
        assert_eq!(store.get_nodes_by_type("world").len(), 1);
    }

    #[test]
    fn test_identical_write_is_noop() {
        let mut store = store_with_world(1);
        let node = store.get_node(1).unwrap();
        let mutation = store.insert_or_assign_node(node).unwrap();
        assert!(mutation.is_empty());
        assert!(mutation.events.is_empty());
    }

    #[test]
    fn test_name_conflict() {
        let mut store = store_with_world(1);
        let err = store
            .insert_or_assign_node(Node::new(2, "room", "world"))
            .unwrap_err();
        assert!(matches!(err, GraphError::NameConflict { existing: 1, .. }));
    }

    #[test]
    fn test_invalid_node() {
        let mut store = GraphStore::new(1);
        assert!(matches!(
            store.insert_or_assign_node(Node::new(3, "", "x")),
            Err(GraphError::InvalidNode(_))
        ));
    }

    #[test]
    fn test_edge_requires_endpoints() {
        let mut store = store_with_world(1);
        let err = store
            .insert_or_assign_edge(Edge::new(1, 9, "RT"))
            .unwrap_err();
        assert!(matches!(err, GraphError::NodeNotFound(_)));
    }

    #[test]
    fn test_delete_node_sweeps_inbound_edges() {
        let mut store = store_with_world(1);
        store
            .insert_or_assign_node(Node::new(2, "robot", "robot"))
            .unwrap();
        store
            .insert_or_assign_node(Node::new(3, "laser", "laser"))
            .unwrap();
        store.insert_or_assign_edge(Edge::new(1, 2, "RT")).unwrap();
        store.insert_or_assign_edge(Edge::new(3, 2, "in")).unwrap();
        store.insert_or_assign_edge(Edge::new(2, 3, "RT")).unwrap();

        let mutation = store.delete_node(2).unwrap();
        // the node itself plus its two inbound sources
        assert_eq!(mutation.deltas.len(), 3);
        assert!(mutation.events.contains(&GraphEvent::NodeDeleted { id: 2 }));
        assert!(mutation.events.contains(&GraphEvent::EdgeDeleted {
            from: 1,
            to: 2,
            edge_type: "RT".into()
        }));
        assert!(mutation.events.contains(&GraphEvent::EdgeDeleted {
            from: 2,
            to: 3,
            edge_type: "RT".into()
        }));

        assert!(store.get_node(2).is_none());
        assert!(store.get_node(1).unwrap().fano.is_empty());
        assert!(store.get_node(3).unwrap().fano.is_empty());
        assert_eq!(store.get_id_from_name("robot"), None);
        assert!(store.get_edges_to_id(2).is_empty());
    }

    #[test]
    fn test_delete_unknown_node() {
        let mut store = GraphStore::new(1);
        assert!(matches!(
            store.delete_node(42),
            Err(GraphError::NodeNotFound(_))
        ));
        assert!(matches!(
            store.delete_node_by_name("ghost"),
            Err(GraphError::NodeNotFound(_))
        ));
    }

    #[test]
    fn test_delete_edges_between() {
        let mut store = store_with_world(1);
        store
            .insert_or_assign_node(Node::new(2, "robot", "robot"))
            .unwrap();
        store.insert_or_assign_edge(Edge::new(1, 2, "RT")).unwrap();
        store.insert_or_assign_edge(Edge::new(1, 2, "sees")).unwrap();

        store.delete_edges(1, 2).unwrap();
        assert!(store.get_edges(1).is_empty());
        assert!(matches!(
            store.delete_edge(1, 2, "RT"),
            Err(GraphError::EdgeNotFound { .. })
        ));
    }

    #[test]
    fn test_update_attribute() {
        let mut store = store_with_world(1);
        store.update_attribute(1, "level", 0).unwrap();
        let node = store.get_node(1).unwrap();
        assert_eq!(node.attribute::<i32>("level").unwrap(), Some(0));
    }

    #[test]
    fn test_delta_replication() {
        let mut a = GraphStore::new(1);
        let mut b = GraphStore::new(2);

        let mutation = a
            .insert_or_assign_node(Node::new(1, "world", "world"))
            .unwrap();
        let mut events = Vec::new();
        for delta in &mutation.deltas {
            events.extend(b.join_delta(delta));
        }
        assert_eq!(
            events,
            vec![GraphEvent::NodeUpserted {
                id: 1,
                node_type: "world".into()
            }]
        );
        assert_eq!(b.get_node(1), a.get_node(1));

        // re-delivery changes nothing
        assert!(b.join_delta(&mutation.deltas[0]).is_empty());
    }

    #[test]
    fn test_export_and_join_full_graph() {
        let mut a = store_with_world(1);
        a.insert_or_assign_node(Node::new(2, "robot", "robot"))
            .unwrap();
        a.delete_node(2).unwrap();

        let mut b = GraphStore::new(2);
        b.join_full_graph(&a.export_state());
        assert_eq!(b.ids(), vec![1]);
        assert!(b.context().includes(a.context()));
    }
}
