//! Publish/subscribe transport abstractions for DSR replication.
//!
//! Replicas talk over three topics. Every publish is delivered to every
//! subscriber of the topic, the publisher included; receivers drop their own
//! echoes by looking at [`Envelope::origin`].

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Unique identifier for a peer.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerId(pub String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The replication topics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    /// Node deltas from local mutations.
    Delta,
    /// Full-graph requests from joining replicas.
    GraphRequest,
    /// Full-graph answers.
    GraphAnswer,
}

impl Topic {
    pub const ALL: [Topic; 3] = [Topic::Delta, Topic::GraphRequest, Topic::GraphAnswer];

    pub fn name(&self) -> &'static str {
        match self {
            Topic::Delta => "DSR",
            Topic::GraphRequest => "DSR_GRAPH_REQUEST",
            Topic::GraphAnswer => "DSR_GRAPH_ANSWER",
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A published message as seen by subscribers.
#[derive(Clone, Debug)]
pub struct Envelope {
    pub origin: PeerId,
    pub topic: Topic,
    pub payload: Vec<u8>,
}

/// Network error type.
#[derive(Clone, Debug)]
pub enum NetworkError {
    AlreadySubscribed(Topic),
    SendFailed(String),
    Disconnected,
}

impl std::fmt::Display for NetworkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkError::AlreadySubscribed(t) => write!(f, "Already subscribed to {}", t),
            NetworkError::SendFailed(e) => write!(f, "Send failed: {}", e),
            NetworkError::Disconnected => write!(f, "Disconnected"),
        }
    }
}

impl std::error::Error for NetworkError {}

/// Abstract publish/subscribe transport.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Identity stamped on everything this transport publishes.
    fn local_id(&self) -> &PeerId;

    /// Publish a payload on a topic.
    async fn publish(&self, topic: Topic, payload: Vec<u8>) -> Result<(), NetworkError>;

    /// Subscribe to a topic. Each topic can be subscribed once per transport.
    fn subscribe(&self, topic: Topic) -> Result<mpsc::Receiver<Envelope>, NetworkError>;
}

/// A delivery postponed by a partition.
enum Held {
    /// Published by a disconnected peer; fanned out on reconnect.
    Outgoing(Envelope),
    /// Addressed to a disconnected peer.
    Incoming(PeerId, Envelope),
}

struct BusInner {
    capacity: usize,
    subscribers: RwLock<HashMap<Topic, Vec<(PeerId, mpsc::Sender<Envelope>)>>>,
    disconnected: RwLock<HashSet<PeerId>>,
    held: Mutex<Vec<Held>>,
    /// Probability of dropping any single delivery.
    loss: RwLock<f64>,
}

/// In-memory pub/sub bus for tests and simulation.
///
/// Supports partitions (`set_connected`) and random message loss. A partition
/// delays traffic rather than losing it: whatever a cut-off peer publishes or
/// should have received is delivered, in order, when it reconnects.
#[derive(Clone)]
pub struct MemoryBus {
    inner: Arc<BusInner>,
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    /// Bus whose per-subscriber queues hold `capacity` envelopes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                capacity,
                subscribers: RwLock::new(HashMap::new()),
                disconnected: RwLock::new(HashSet::new()),
                held: Mutex::new(Vec::new()),
                loss: RwLock::new(0.0),
            }),
        }
    }

    /// A transport attached to this bus.
    pub fn transport(&self, local_id: impl Into<PeerId>) -> MemoryTransport {
        MemoryTransport {
            local_id: local_id.into(),
            bus: self.clone(),
        }
    }

    /// Cut a peer off the bus, or reattach it and flush what it missed.
    pub async fn set_connected(&self, peer: &PeerId, connected: bool) {
        if !connected {
            self.inner.disconnected.write().insert(peer.clone());
            return;
        }
        if !self.inner.disconnected.write().remove(peer) {
            return;
        }

        let released: Vec<Held> = {
            let mut held = self.inner.held.lock();
            let (mine, rest): (Vec<Held>, Vec<Held>) =
                std::mem::take(&mut *held).into_iter().partition(|h| match h {
                    Held::Outgoing(envelope) => envelope.origin == *peer,
                    Held::Incoming(target, _) => target == peer,
                });
            *held = rest;
            mine
        };
        debug!(%peer, released = released.len(), "peer reconnected");

        for h in released {
            match h {
                Held::Outgoing(envelope) => self.fan_out(envelope, false).await,
                Held::Incoming(target, envelope) => {
                    let tx = self.sender_for(&target, envelope.topic);
                    if let Some(tx) = tx {
                        let _ = tx.send(envelope).await;
                    }
                }
            }
        }
    }

    pub fn is_connected(&self, peer: &PeerId) -> bool {
        !self.inner.disconnected.read().contains(peer)
    }

    /// Drop each delivery with probability `loss` (clamped to `[0, 1]`).
    pub fn set_loss(&self, loss: f64) {
        *self.inner.loss.write() = loss.clamp(0.0, 1.0);
    }

    fn sender_for(&self, peer: &PeerId, topic: Topic) -> Option<mpsc::Sender<Envelope>> {
        self.inner
            .subscribers
            .read()
            .get(&topic)?
            .iter()
            .find(|(p, tx)| p == peer && !tx.is_closed())
            .map(|(_, tx)| tx.clone())
    }

    async fn deliver(&self, envelope: Envelope) {
        if self.is_connected(&envelope.origin) {
            self.fan_out(envelope, true).await;
            return;
        }

        trace!(origin = %envelope.origin, topic = %envelope.topic, "sender partitioned, holding");
        // The publisher still hears itself.
        if let Some(tx) = self.sender_for(&envelope.origin, envelope.topic) {
            let _ = tx.send(envelope.clone()).await;
        }
        self.inner.held.lock().push(Held::Outgoing(envelope));
    }

    /// Deliver to every other subscriber of the topic, and to the origin when
    /// `echo` is set. Disconnected subscribers get the envelope held for them.
    async fn fan_out(&self, envelope: Envelope, echo: bool) {
        let targets: Vec<(PeerId, mpsc::Sender<Envelope>)> = {
            let subscribers = self.inner.subscribers.read();
            let disconnected = self.inner.disconnected.read();
            let loss = *self.inner.loss.read();
            let mut rng = rand::thread_rng();
            let mut held = self.inner.held.lock();
            let mut targets = Vec::new();
            for (peer, tx) in subscribers.get(&envelope.topic).into_iter().flatten() {
                if *peer == envelope.origin {
                    if echo {
                        targets.push((peer.clone(), tx.clone()));
                    }
                } else if disconnected.contains(peer) {
                    held.push(Held::Incoming(peer.clone(), envelope.clone()));
                } else if !rng.gen_bool(loss) {
                    targets.push((peer.clone(), tx.clone()));
                }
            }
            targets
        };

        let sends = targets.iter().map(|(_, tx)| tx.send(envelope.clone()));
        let results = futures::future::join_all(sends).await;

        if results.iter().any(Result::is_err) {
            // Drop subscribers whose receiving side is gone.
            let mut subscribers = self.inner.subscribers.write();
            if let Some(subs) = subscribers.get_mut(&envelope.topic) {
                subs.retain(|(_, tx)| !tx.is_closed());
            }
        }
    }
}

/// One peer's view of a [`MemoryBus`].
#[derive(Clone)]
pub struct MemoryTransport {
    local_id: PeerId,
    bus: MemoryBus,
}

impl MemoryTransport {
    pub fn bus(&self) -> &MemoryBus {
        &self.bus
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn local_id(&self) -> &PeerId {
        &self.local_id
    }

    async fn publish(&self, topic: Topic, payload: Vec<u8>) -> Result<(), NetworkError> {
        self.bus
            .deliver(Envelope {
                origin: self.local_id.clone(),
                topic,
                payload,
            })
            .await;
        Ok(())
    }

    fn subscribe(&self, topic: Topic) -> Result<mpsc::Receiver<Envelope>, NetworkError> {
        let mut subscribers = self.bus.inner.subscribers.write();
        let subs = subscribers.entry(topic).or_default();
        if subs
            .iter()
            .any(|(peer, tx)| *peer == self.local_id && !tx.is_closed())
        {
            return Err(NetworkError::AlreadySubscribed(topic));
        }
        let (tx, rx) = mpsc::channel(self.bus.inner.capacity);
        subs.push((self.local_id.clone(), tx));
        Ok(rx)
    }
}

/// Create a bus with `count` attached transports named `agent-0`, `agent-1`, ...
pub fn create_network(count: usize) -> (MemoryBus, Vec<MemoryTransport>) {
    let bus = MemoryBus::new();
    let transports = (0..count)
        .map(|i| bus.transport(PeerId::new(format!("agent-{}", i))))
        .collect();
    (bus, transports)
}
