/// Integration tests: two runtimes driving nodes over one shared store.
///
/// Intervals are shrunk to milliseconds; every wait is bounded by a
/// timeout so a regression fails instead of hanging.
use std::sync::Arc;
use std::time::Duration;

use slate_protocol::tracker::DeliveryStatus;
use slate_protocol::{
    MeshEvent, NodeConfig, NodeId, NodeRuntime, PeerNode, RetryPolicy, RuntimeConfig, Subscription,
};
use slate_store::MemoryStore;

fn fast_config() -> RuntimeConfig {
    RuntimeConfig {
        heartbeat_interval: Duration::from_millis(20),
        announce_interval: Duration::from_millis(30),
        ingest_interval: Duration::from_millis(20),
        liveness_interval: Duration::from_millis(20),
        message_poll_interval: Duration::from_millis(10),
        delivery_poll_interval: Duration::from_millis(10),
        maintenance_interval: Duration::from_millis(100),
        register_on_start: true,
    }
}

fn node(store: &MemoryStore, id: &str, ns: u16) -> Arc<PeerNode> {
    Arc::new(PeerNode::new(
        Arc::new(store.clone()),
        NodeId::participant(id, ns).expect("valid id"),
        NodeConfig::new()
            .heartbeat_timeout(Duration::from_millis(200))
            .retry(RetryPolicy::immediate(3)),
    ))
}

/// Wait up to 5 s for an event matching `pred`, discarding the others.
async fn wait_for<F>(sub: &mut Subscription<MeshEvent>, pred: F) -> MeshEvent
where
    F: Fn(&MeshEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match sub.recv().await {
                Some(event) if pred(&event) => return event,
                Some(_) => continue,
                None => panic!("event bus closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Poll `cond` every 10 ms for up to 5 s.
async fn eventually<F: Fn() -> bool>(cond: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition never held");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn two_nodes_discover_route_and_deliver() {
    let _ = tracing_subscriber::fmt().with_env_filter("warn").try_init();

    let store = MemoryStore::new();
    let alice = node(&store, "alice", 7001);
    let bob = node(&store, "bob", 7002);
    let mut alice_events = alice.events().subscribe();
    let mut bob_events = bob.events().subscribe();

    let alice_rt = NodeRuntime::spawn(alice.clone(), fast_config());
    let bob_rt = NodeRuntime::spawn(bob.clone(), fast_config());

    // ── Discovery ──────────────────────────────────────────────────────
    wait_for(&mut alice_events, |e| {
        matches!(e, MeshEvent::PeerDiscovered { node_id, .. } if node_id == "bob")
    })
    .await;

    // ── Routing ────────────────────────────────────────────────────────
    eventually(|| alice.get_route("bob:7002").is_some_and(|r| r.metric == 1)).await;
    eventually(|| bob.get_route("alice:7001").is_some_and(|r| r.metric == 1)).await;

    // ── Messaging + acknowledgement ────────────────────────────────────
    let id = alice_rt.send_private("bob", "ping").await;
    assert_eq!(id.len(), 8);

    let received = wait_for(&mut bob_events, |e| {
        matches!(e, MeshEvent::MessageReceived { message_id, .. } if *message_id == id)
    })
    .await;
    let MeshEvent::MessageReceived { sender, line, .. } = received else {
        unreachable!()
    };
    assert_eq!(sender, "alice");
    assert!(line.contains("alice -> bob: ping"));

    wait_for(&mut alice_events, |e| {
        matches!(
            e,
            MeshEvent::DeliveryChanged { message_id, current: DeliveryStatus::Acknowledged, .. }
                if *message_id == id
        )
    })
    .await;

    assert_eq!(bob_rt.read_all().await.len(), 1);
    assert_eq!(alice.registered_peers(), ["alice", "bob"]);

    alice_rt.shutdown().await;
    bob_rt.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stopped_peer_goes_offline() {
    let _ = tracing_subscriber::fmt().with_env_filter("warn").try_init();

    let store = MemoryStore::new();
    let alice = node(&store, "alice", 7001);
    let bob = node(&store, "bob", 7002);
    let mut events = alice.events().subscribe();

    let alice_rt = NodeRuntime::spawn(alice.clone(), fast_config());
    let bob_rt = NodeRuntime::spawn(bob, fast_config());

    wait_for(&mut events, |e| {
        matches!(e, MeshEvent::PeerDiscovered { node_id, .. } if node_id == "bob")
    })
    .await;

    // No goodbye: bob just stops heartbeating
    bob_rt.shutdown().await;
    wait_for(&mut events, |e| {
        matches!(e, MeshEvent::PeerOffline { node_id, .. } if node_id == "bob")
    })
    .await;
    assert!(!alice.peer_status("bob", 7002).alive);

    alice_rt.shutdown().await;
}

#[tokio::test]
async fn shutdown_stops_every_action() {
    let store = MemoryStore::new();
    let alice = node(&store, "alice", 7001);

    let rt = NodeRuntime::spawn(alice.clone(), fast_config());
    tokio::time::sleep(Duration::from_millis(60)).await;
    rt.shutdown().await;

    let writes = store.write_count();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(store.write_count(), writes);

    // The node outlives its runtime
    assert!(alice.publish_heartbeat());
}

#[tokio::test]
async fn snapshot_and_export_through_handle() {
    let dir = tempfile::tempdir().unwrap();
    let store = MemoryStore::new();
    let alice = node(&store, "alice", 7001);
    let rt = NodeRuntime::spawn(
        alice,
        RuntimeConfig {
            register_on_start: false,
            ..RuntimeConfig::default()
        },
    );

    assert!(!rt.send_broadcast("hello").await.is_empty());
    assert!(rt.save_snapshot().await);
    let out = dir.path().join("export.json");
    assert!(rt.export_messages(Some(out.clone())).await);
    assert!(out.exists());
    assert!(rt.node().registered_peers().is_empty());

    rt.shutdown().await;
}
