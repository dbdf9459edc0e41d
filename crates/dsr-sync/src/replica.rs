//! The replica handle: local graph API plus the replication tasks behind it.
//!
//! Local path: take the write lock, mutate the store, release, queue the
//! deltas for the publisher task, then notify observers. Remote path: see
//! [`crate::inbound`].

use crate::anti_entropy::{self, SyncState};
use crate::config::ReplicaConfig;
use crate::error::{Result, SyncError};
use crate::inbound;
use crate::message::{encode, DeltaMessage};
use crate::network::{Topic, Transport};
use crate::observer::EventBus;
use dsr_core::AgentId;
use dsr_graph::{
    Edge, GraphEvent, GraphState, GraphStore, Mutation, Node, NodeDelta, NodeId, Value,
};
use parking_lot::RwLock;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// A payload queued for publication.
pub(crate) struct Outbound {
    topic: Topic,
    payload: Vec<u8>,
}

/// State shared by the replica handle and its tasks.
pub(crate) struct Shared<T: Transport> {
    pub(crate) config: ReplicaConfig,
    pub(crate) store: RwLock<GraphStore>,
    pub(crate) events: EventBus,
    outbound: mpsc::UnboundedSender<Outbound>,
    state: watch::Sender<SyncState>,
    transport: Arc<T>,
}

impl<T: Transport> Shared<T> {
    /// Encode and queue a message for the publisher task.
    pub(crate) fn send<M: Serialize>(&self, topic: Topic, message: &M) -> Result<()> {
        let payload = encode(message)?;
        self.outbound
            .send(Outbound { topic, payload })
            .map_err(|_| SyncError::ChannelClosed("publisher"))
    }

    pub(crate) fn publish_deltas(&self, deltas: Vec<NodeDelta>) {
        for delta in deltas {
            let message = DeltaMessage {
                agent_id: self.config.agent_id,
                delta,
            };
            if let Err(e) = self.send(Topic::Delta, &message) {
                error!(id = message.delta.id, error = %e, "delta not published");
            }
        }
    }

    pub(crate) fn sync_state(&self) -> SyncState {
        *self.state.borrow()
    }

    pub(crate) fn set_state(&self, state: SyncState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(?previous, ?state, "sync state changed");
        }
    }
}

async fn publisher<T: Transport>(transport: Arc<T>, mut rx: mpsc::UnboundedReceiver<Outbound>) {
    while let Some(Outbound { topic, payload }) = rx.recv().await {
        if let Err(e) = transport.publish(topic, payload).await {
            warn!(%topic, error = %e, "publish failed");
        }
    }
}

/// A live replica of the DSR graph.
///
/// Reads never block on the network. Mutations report failure as `false`
/// (the cause is logged). Dropping the handle stops every replication task.
pub struct DsrGraph<T: Transport> {
    shared: Arc<Shared<T>>,
    tasks: Vec<JoinHandle<()>>,
}

impl<T: Transport> DsrGraph<T> {
    /// Subscribe to the replication topics, start the replication tasks and
    /// run the startup protocol. Returns once the replica is steady.
    pub async fn start(config: ReplicaConfig, transport: Arc<T>) -> Result<Self> {
        let receivers = Topic::ALL
            .iter()
            .map(|topic| transport.subscribe(*topic).map(|rx| (*topic, rx)))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (merge_tx, merge_rx) = mpsc::channel(config.channel_capacity.max(1));
        let (state_tx, _) = watch::channel(SyncState::Bootstrapping);

        let shared = Arc::new(Shared {
            store: RwLock::new(GraphStore::new(config.agent_id)),
            events: EventBus::new(config.event_capacity),
            outbound: outbound_tx,
            state: state_tx,
            transport: transport.clone(),
            config,
        });

        let mut tasks = vec![tokio::spawn(publisher(transport.clone(), outbound_rx))];
        for (topic, rx) in receivers {
            tasks.push(inbound::spawn_subscription(
                topic,
                rx,
                transport.local_id().clone(),
                merge_tx.clone(),
            ));
        }
        tasks.push(tokio::spawn(inbound::merge_loop(shared.clone(), merge_rx)));

        let replica = Self { shared, tasks };
        anti_entropy::bootstrap(&replica.shared).await?;
        info!(
            agent = %replica.shared.config.agent_name,
            nodes = replica.size(),
            "replica steady"
        );
        Ok(replica)
    }

    pub fn agent_id(&self) -> AgentId {
        self.shared.config.agent_id
    }

    pub fn agent_name(&self) -> &str {
        &self.shared.config.agent_name
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.shared.transport
    }

    pub fn sync_state(&self) -> SyncState {
        self.shared.sync_state()
    }

    /// Watch the startup protocol.
    pub fn watch_state(&self) -> watch::Receiver<SyncState> {
        self.shared.state.subscribe()
    }

    // === Observers ===

    /// Subscribe to graph events.
    pub fn subscribe(&self) -> broadcast::Receiver<GraphEvent> {
        self.shared.events.subscribe()
    }

    /// Run `callback` on every graph event, after the store lock is released.
    pub fn on_event(&self, callback: impl Fn(&GraphEvent) + Send + Sync + 'static) {
        self.shared.events.on_event(callback);
    }

    // === Reads ===

    pub fn get_node(&self, id: NodeId) -> Option<Node> {
        self.shared.store.read().get_node(id)
    }

    pub fn get_node_by_name(&self, name: &str) -> Option<Node> {
        self.shared.store.read().get_node_by_name(name)
    }

    pub fn get_nodes_by_type(&self, node_type: &str) -> Vec<Node> {
        self.shared.store.read().get_nodes_by_type(node_type)
    }

    pub fn get_node_level(&self, id: NodeId) -> Option<i32> {
        self.shared.store.read().get_node_level(id)
    }

    pub fn get_edge(&self, from: NodeId, to: NodeId, edge_type: &str) -> Option<Edge> {
        self.shared.store.read().get_edge(from, to, edge_type)
    }

    pub fn get_edge_by_name(&self, from: &str, to: &str, edge_type: &str) -> Option<Edge> {
        self.shared.store.read().get_edge_by_name(from, to, edge_type)
    }

    pub fn get_edges(&self, id: NodeId) -> Vec<Edge> {
        self.shared.store.read().get_edges(id)
    }

    pub fn get_edges_by_type(&self, edge_type: &str) -> Vec<Edge> {
        self.shared.store.read().get_edges_by_type(edge_type)
    }

    pub fn get_edges_to_id(&self, id: NodeId) -> Vec<Edge> {
        self.shared.store.read().get_edges_to_id(id)
    }

    pub fn get_name_from_id(&self, id: NodeId) -> Option<String> {
        self.shared.store.read().get_name_from_id(id)
    }

    pub fn get_id_from_name(&self, name: &str) -> Option<NodeId> {
        self.shared.store.read().get_id_from_name(name)
    }

    pub fn size(&self) -> usize {
        self.shared.store.read().size()
    }

    pub fn nodes(&self) -> Vec<Node> {
        self.shared.store.read().nodes()
    }

    pub fn ids(&self) -> Vec<NodeId> {
        self.shared.store.read().ids()
    }

    /// Copy of the replicated state.
    pub fn export_state(&self) -> GraphState {
        self.shared.store.read().export_state()
    }

    // === Mutations ===

    pub fn insert_or_assign_node(&self, node: Node) -> bool {
        self.mutate("insert_or_assign_node", |store| store.insert_or_assign_node(node))
    }

    pub fn delete_node(&self, id: NodeId) -> bool {
        self.mutate("delete_node", |store| store.delete_node(id))
    }

    pub fn delete_node_by_name(&self, name: &str) -> bool {
        self.mutate("delete_node_by_name", |store| store.delete_node_by_name(name))
    }

    pub fn insert_or_assign_edge(&self, edge: Edge) -> bool {
        self.mutate("insert_or_assign_edge", |store| store.insert_or_assign_edge(edge))
    }

    pub fn delete_edge(&self, from: NodeId, to: NodeId, edge_type: &str) -> bool {
        self.mutate("delete_edge", |store| store.delete_edge(from, to, edge_type))
    }

    pub fn delete_edge_by_name(&self, from: &str, to: &str, edge_type: &str) -> bool {
        self.mutate("delete_edge_by_name", |store| {
            store.delete_edge_by_name(from, to, edge_type)
        })
    }

    /// Delete every edge between two nodes.
    pub fn delete_edges(&self, from: NodeId, to: NodeId) -> bool {
        self.mutate("delete_edges", |store| store.delete_edges(from, to))
    }

    pub fn update_attribute(&self, id: NodeId, key: &str, value: impl Into<Value>) -> bool {
        self.mutate("update_attribute", |store| {
            store.update_attribute(id, key, value)
        })
    }

    // === Persistence ===

    /// Load a graph file through the local mutation path, so peers receive it.
    pub fn read_from_json_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let mutation = self.shared.store.write().read_from_json_file(path)?;
        self.finish(mutation);
        Ok(())
    }

    pub fn write_to_json_file(&self, path: impl AsRef<Path>) -> Result<()> {
        self.shared.store.read().write_to_json_file(path)?;
        Ok(())
    }

    fn mutate<F>(&self, op: &'static str, f: F) -> bool
    where
        F: FnOnce(&mut GraphStore) -> dsr_graph::Result<Mutation>,
    {
        let result = {
            let mut store = self.shared.store.write();
            f(&mut store)
        };
        match result {
            Ok(mutation) => {
                self.finish(mutation);
                true
            }
            Err(e) => {
                warn!(op, error = %e, "local mutation rejected");
                false
            }
        }
    }

    fn finish(&self, mutation: Mutation) {
        let Mutation { deltas, events } = mutation;
        self.shared.publish_deltas(deltas);
        self.shared.events.emit(&events);
    }
}

impl<T: Transport> Drop for DsrGraph<T> {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
