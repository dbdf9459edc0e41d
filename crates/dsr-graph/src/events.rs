//! Change notifications produced by store mutations and merges.

use crate::node::{Node, NodeId};
use serde::{Deserialize, Serialize};

/// A visible change to the graph.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GraphEvent {
    /// A node was created or any of its own fields or attributes changed.
    NodeUpserted { id: NodeId, node_type: String },
    /// A node disappeared.
    NodeDeleted { id: NodeId },
    /// An edge was created or changed.
    EdgeUpserted {
        from: NodeId,
        to: NodeId,
        edge_type: String,
    },
    /// An edge disappeared.
    EdgeDeleted {
        from: NodeId,
        to: NodeId,
        edge_type: String,
    },
}

/// Events turning the visible node `before` into `after`.
pub fn diff(id: NodeId, before: Option<&Node>, after: Option<&Node>) -> Vec<GraphEvent> {
    let mut events = Vec::new();
    match (before, after) {
        (None, None) => {}
        (None, Some(new)) => {
            events.push(GraphEvent::NodeUpserted {
                id,
                node_type: new.node_type.clone(),
            });
            events.extend(new.edges().map(|e| GraphEvent::EdgeUpserted {
                from: e.from,
                to: e.to,
                edge_type: e.edge_type.clone(),
            }));
        }
        (Some(old), None) => {
            events.extend(old.edges().map(|e| GraphEvent::EdgeDeleted {
                from: e.from,
                to: e.to,
                edge_type: e.edge_type.clone(),
            }));
            events.push(GraphEvent::NodeDeleted { id });
        }
        (Some(old), Some(new)) => {
            if old.node_type != new.node_type || old.name != new.name || old.attrs != new.attrs {
                events.push(GraphEvent::NodeUpserted {
                    id,
                    node_type: new.node_type.clone(),
                });
            }
            for (key, reg) in &new.fano {
                if old.fano.get(key) != Some(reg) {
                    events.push(GraphEvent::EdgeUpserted {
                        from: id,
                        to: key.to,
                        edge_type: key.edge_type.clone(),
                    });
                }
            }
            for key in old.fano.keys().filter(|k| !new.fano.contains_key(*k)) {
                events.push(GraphEvent::EdgeDeleted {
                    from: id,
                    to: key.to,
                    edge_type: key.edge_type.clone(),
                });
            }
        }
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Edge;

    #[test]
    fn test_diff_edge_changes_only() {
        let mut old = Node::new(1, "world", "world");
        old.put_edge(Edge::new(1, 2, "RT"));
        let mut new = old.clone();
        new.remove_edge(2, "RT");
        new.put_edge(Edge::new(1, 3, "RT"));

        let events = diff(1, Some(&old), Some(&new));
        assert_eq!(
            events,
            vec![
                GraphEvent::EdgeUpserted { from: 1, to: 3, edge_type: "RT".into() },
                GraphEvent::EdgeDeleted { from: 1, to: 2, edge_type: "RT".into() },
            ]
        );
    }

    #[test]
    fn test_diff_deletion_reports_edges_first() {
        let mut old = Node::new(4, "mesh", "m");
        old.put_edge(Edge::new(4, 1, "in"));
        let events = diff(4, Some(&old), None);
        assert_eq!(events.last(), Some(&GraphEvent::NodeDeleted { id: 4 }));
        assert_eq!(events.len(), 2);
    }
}
