//! End-to-end replication over the in-memory bus.

use dsr_core::AgentId;
use dsr_graph::{Edge, GraphEvent, GraphStore, Node, Value};
use dsr_sync::message::{decode, encode};
use dsr_sync::{
    DeltaMessage, DsrGraph, GraphAnswer, GraphRequest, MemoryBus, MemoryTransport,
    ReplicaConfigBuilder, SyncState, Topic, Transport,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tokio_test::assert_ok;

type Replica = DsrGraph<MemoryTransport>;

async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        sleep(Duration::from_millis(10)).await;
    }
}

/// First replica on the bus: one short request, then steady alone.
async fn start_alone(bus: &MemoryBus, id: AgentId, name: &str) -> Replica {
    let config = ReplicaConfigBuilder::new(id, name)
        .sync_timeout(50)
        .sync_poll_interval(5)
        .sync_attempts(1)
        .build();
    assert_ok!(DsrGraph::start(config, Arc::new(bus.transport(name))).await)
}

/// A replica joining peers that are already steady.
async fn join(bus: &MemoryBus, id: AgentId, name: &str) -> Replica {
    let config = ReplicaConfigBuilder::new(id, name)
        .sync_timeout(2000)
        .sync_poll_interval(5)
        .sync_attempts(2)
        .build();
    assert_ok!(DsrGraph::start(config, Arc::new(bus.transport(name))).await)
}

fn levels(replica: &Replica, id: i32) -> Vec<i32> {
    let Some(node) = replica.get_node(id) else {
        return Vec::new();
    };
    let mut levels: Vec<i32> = node
        .attrs
        .get_all("level")
        .iter()
        .filter_map(|attr| match attr.value {
            Value::Int(v) => Some(v),
            _ => None,
        })
        .collect();
    levels.sort();
    levels
}

fn world_robot_camera(replica: &Replica) {
    assert!(replica.insert_or_assign_node(Node::new(1, "world", "world")));
    assert!(replica.insert_or_assign_node(Node::new(2, "robot", "robot")));
    assert!(replica.insert_or_assign_node(Node::new(3, "camera", "camera")));
    assert!(replica.insert_or_assign_edge(Edge::new(1, 2, "RT")));
    assert!(replica.insert_or_assign_edge(Edge::new(3, 2, "looks_at")));
}

#[tokio::test]
async fn lone_replica_goes_steady_after_its_attempts() {
    let bus = MemoryBus::new();
    let config = ReplicaConfigBuilder::new(1, "solo")
        .sync_timeout(50)
        .sync_poll_interval(5)
        .sync_attempts(2)
        .build();

    let started = Instant::now();
    let replica = assert_ok!(DsrGraph::start(config, Arc::new(bus.transport("solo"))).await);

    assert!(started.elapsed() >= Duration::from_millis(100));
    assert_eq!(replica.sync_state(), SyncState::Steady);
    assert_eq!(*replica.watch_state().borrow(), SyncState::Steady);
    assert_eq!(replica.size(), 0);
}

#[tokio::test]
async fn late_joiner_receives_the_full_graph() {
    let bus = MemoryBus::new();
    let a = start_alone(&bus, 1, "builder").await;
    world_robot_camera(&a);
    assert!(a.delete_node(3));

    let b = join(&bus, 2, "viewer").await;

    assert_eq!(b.sync_state(), SyncState::Steady);
    assert_eq!(b.size(), 2);
    assert!(b.get_edge(1, 2, "RT").is_some());
    assert!(b.get_node(3).is_none());
    assert_eq!(b.get_id_from_name("robot"), Some(2));
    assert_eq!(b.nodes(), a.nodes());
}

#[tokio::test]
async fn deltas_flow_both_ways() {
    let bus = MemoryBus::new();
    let a = start_alone(&bus, 1, "a").await;
    let b = join(&bus, 2, "b").await;

    assert!(a.insert_or_assign_node(Node::new(1, "world", "world")));
    eventually("node on b", || b.get_node(1).is_some()).await;

    assert!(b.insert_or_assign_node(Node::new(2, "robot", "robot")));
    assert!(b.insert_or_assign_edge(Edge::new(1, 2, "RT")));
    eventually("edge on a", || a.get_edge(1, 2, "RT").is_some()).await;

    assert!(a.update_attribute(2, "battery", 0.5f32));
    eventually("attribute on b", || {
        b.get_node(2)
            .and_then(|n| n.attribute::<f32>("battery").ok().flatten())
            == Some(0.5)
    })
    .await;

    assert_eq!(a.nodes(), b.nodes());
}

#[tokio::test]
async fn concurrent_level_writes_survive_a_partition_until_collapsed() {
    let bus = MemoryBus::new();
    let a = start_alone(&bus, 1, "a").await;
    let b = join(&bus, 2, "b").await;
    assert!(a.insert_or_assign_node(Node::new(5, "robot", "robot")));
    eventually("robot on b", || b.get_node(5).is_some()).await;

    bus.set_connected(&"a".into(), false).await;
    assert!(a.update_attribute(5, "level", 1));
    assert!(b.update_attribute(5, "level", 2));
    sleep(Duration::from_millis(50)).await;
    assert_eq!(levels(&a, 5), vec![1]);
    assert_eq!(levels(&b, 5), vec![2]);

    bus.set_connected(&"a".into(), true).await;
    eventually("both levels on a", || levels(&a, 5) == vec![1, 2]).await;
    eventually("both levels on b", || levels(&b, 5) == vec![1, 2]).await;
    assert_eq!(a.get_node(5), b.get_node(5));

    assert!(b.update_attribute(5, "level", 3));
    eventually("collapse on a", || levels(&a, 5) == vec![3]).await;
    assert_eq!(levels(&b, 5), vec![3]);
}

#[tokio::test]
async fn deleting_a_node_removes_inbound_edges_everywhere() {
    let bus = MemoryBus::new();
    let a = start_alone(&bus, 1, "a").await;
    let b = join(&bus, 2, "b").await;
    world_robot_camera(&a);
    eventually("edges on b", || b.get_edges_to_id(2).len() == 2).await;

    assert!(b.delete_node(2));
    assert!(b.get_edges(1).is_empty());

    eventually("robot gone on a", || a.get_node(2).is_none()).await;
    eventually("edges gone on a", || {
        a.get_edges(1).is_empty() && a.get_edges(3).is_empty()
    })
    .await;
    assert!(a.get_edges_to_id(2).is_empty());
    assert!(a.get_edges_by_type("RT").is_empty());
    assert_eq!(a.get_id_from_name("robot"), None);
    assert_eq!(a.nodes(), b.nodes());
}

#[tokio::test]
async fn own_echoes_and_garbage_are_ignored() {
    let bus = MemoryBus::new();
    let a = start_alone(&bus, 1, "a").await;
    let rogue = bus.transport("rogue");

    // A delta stamped with a's own origin must not be joined.
    let mut other = GraphStore::new(9);
    let forged = other
        .insert_or_assign_node(Node::new(42, "ghost", "ghost"))
        .unwrap();
    let payload = encode(&DeltaMessage {
        agent_id: 9,
        delta: forged.deltas[0].clone(),
    })
    .unwrap();
    a.transport().publish(Topic::Delta, payload).await.unwrap();

    rogue
        .publish(Topic::Delta, b"not a delta".to_vec())
        .await
        .unwrap();

    let real = other
        .insert_or_assign_node(Node::new(7, "thing", "thing"))
        .unwrap();
    let payload = encode(&DeltaMessage {
        agent_id: 9,
        delta: real.deltas[0].clone(),
    })
    .unwrap();
    rogue.publish(Topic::Delta, payload).await.unwrap();

    eventually("valid delta after garbage", || a.get_node(7).is_some()).await;
    assert!(a.get_node(42).is_none());
    assert_eq!(a.size(), 1);
}

#[tokio::test]
async fn steady_replica_answers_requests_from_others_only() {
    let bus = MemoryBus::new();
    let observer = bus.transport("observer");
    let mut answers = observer.subscribe(Topic::GraphAnswer).unwrap();

    let a = start_alone(&bus, 1, "a").await;
    world_robot_camera(&a);
    sleep(Duration::from_millis(20)).await;
    // a asked once at startup and nobody, a included, answered.
    assert!(answers.try_recv().is_err());

    let request = encode(&GraphRequest {
        from: "observer".into(),
    })
    .unwrap();
    observer.publish(Topic::GraphRequest, request).await.unwrap();

    let envelope = tokio::time::timeout(Duration::from_secs(5), answers.recv())
        .await
        .expect("answer in time")
        .expect("bus open");
    let answer: GraphAnswer = decode(&envelope.payload).unwrap();
    assert_eq!(answer.from, "a");
    assert_eq!(answer.to, "observer");

    let mut copy = GraphStore::new(50);
    copy.join_full_graph(&answer.state);
    assert_eq!(copy.nodes(), a.nodes());
}

#[tokio::test]
async fn only_the_first_answer_is_joined() {
    let bus = MemoryBus::new();
    let a = start_alone(&bus, 1, "a").await;
    world_robot_camera(&a);
    let b = join(&bus, 2, "b").await;
    assert_eq!(b.size(), 3);

    let events = Arc::new(Mutex::new(Vec::new()));
    let c = join(&bus, 3, "c").await;
    let seen = events.clone();
    c.on_event(move |event| seen.lock().push(event.clone()));

    // Both a and b answered; the second answer arrives after c went steady.
    sleep(Duration::from_millis(100)).await;
    assert_eq!(c.sync_state(), SyncState::Steady);
    assert_eq!(c.nodes(), a.nodes());
    assert!(events.lock().is_empty());
}

#[tokio::test]
async fn remote_changes_reach_observers() {
    let bus = MemoryBus::new();
    let a = start_alone(&bus, 1, "a").await;
    let b = join(&bus, 2, "b").await;

    let events = Arc::new(Mutex::new(Vec::new()));
    let seen = events.clone();
    b.on_event(move |event| seen.lock().push(event.clone()));
    let mut local = a.subscribe();

    assert!(a.insert_or_assign_node(Node::new(1, "world", "world")));
    assert_eq!(
        local.recv().await.unwrap(),
        GraphEvent::NodeUpserted {
            id: 1,
            node_type: "world".into()
        }
    );

    assert!(a.insert_or_assign_node(Node::new(2, "robot", "robot")));
    assert!(a.insert_or_assign_edge(Edge::new(1, 2, "RT")));
    assert!(a.delete_edge(1, 2, "RT"));

    eventually("four remote events", || events.lock().len() == 4).await;
    let events = events.lock();
    assert_eq!(
        events[2],
        GraphEvent::EdgeUpserted {
            from: 1,
            to: 2,
            edge_type: "RT".into()
        }
    );
    assert_eq!(
        events[3],
        GraphEvent::EdgeDeleted {
            from: 1,
            to: 2,
            edge_type: "RT".into()
        }
    );
}

#[tokio::test]
async fn rejected_mutations_report_false() {
    let bus = MemoryBus::new();
    let a = start_alone(&bus, 1, "a").await;
    assert!(a.insert_or_assign_node(Node::new(1, "world", "world")));

    assert!(!a.insert_or_assign_node(Node::new(2, "world", "world")));
    assert!(!a.insert_or_assign_edge(Edge::new(1, 99, "RT")));
    assert!(!a.delete_node(99));
    assert!(!a.update_attribute(99, "level", 1));
    assert_eq!(a.size(), 1);
}

#[tokio::test]
async fn seeded_replica_shares_its_graph() {
    let path = std::env::temp_dir().join(format!("dsr-seed-{}.json", std::process::id()));
    let mut seed = GraphStore::new(100);
    seed.insert_or_assign_node(Node::new(1, "world", "world")).unwrap();
    seed.insert_or_assign_node(Node::new(2, "robot", "robot")).unwrap();
    seed.insert_or_assign_edge(Edge::new(1, 2, "RT")).unwrap();
    seed.write_to_json_file(&path).unwrap();

    let bus = MemoryBus::new();
    let config = ReplicaConfigBuilder::new(1, "seeded")
        .sync_timeout(50)
        .sync_poll_interval(5)
        .sync_attempts(1)
        .seed_file(&path)
        .build();
    let a = assert_ok!(DsrGraph::start(config, Arc::new(bus.transport("seeded"))).await);
    assert_eq!(a.sync_state(), SyncState::Steady);
    assert_eq!(a.get_node(1).map(|n| n.agent_id), Some(1));
    assert_eq!(a.size(), 2);
    assert!(a.get_edge_by_name("world", "robot", "RT").is_some());
    assert_eq!(a.get_node_level(1), Some(0));
    assert_eq!(a.get_node_level(2), Some(1));

    let b = join(&bus, 2, "viewer").await;
    assert_eq!(b.nodes(), a.nodes());

    let copy = std::env::temp_dir().join(format!("dsr-copy-{}.json", std::process::id()));
    assert_ok!(b.write_to_json_file(&copy));
    let mut reloaded = GraphStore::new(3);
    reloaded.read_from_json_file(&copy).unwrap();
    assert_eq!(reloaded.size(), 2);

    let _ = std::fs::remove_file(&path);
    let _ = std::fs::remove_file(&copy);
}
