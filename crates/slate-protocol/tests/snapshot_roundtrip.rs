/// Integration tests: state snapshots and message exports.
///
/// Runs against a real directory store so that a "restarted" node is a
/// brand new `PeerNode` opening the same directory.
use std::sync::Arc;

use slate_protocol::tracker::DeliveryStatus;
use slate_protocol::{MeshEvent, NodeConfig, NodeId, PeerNode, RetryPolicy, StateSnapshot};
use slate_store::{ChannelStore, DirStore, DirStoreConfig};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_env_filter("warn").try_init();
}

fn open(dir: &std::path::Path) -> Arc<dyn ChannelStore> {
    Arc::new(DirStore::open(DirStoreConfig::new().root(dir)).expect("open store"))
}

fn node(store: &Arc<dyn ChannelStore>, id: &str, ns: u16) -> PeerNode {
    PeerNode::new(
        store.clone(),
        NodeId::coordinator(id, ns).expect("valid id"),
        NodeConfig::new().retry(RetryPolicy::immediate(3)),
    )
}

#[test]
fn restart_restores_routing_deliveries_and_heartbeats() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path());

    let alice = node(&store, "alice", 7001);
    let bob = node(&store, "bob", 7002);

    bob.publish_heartbeat();
    bob.broadcast_route_update();
    alice.publish_heartbeat();
    alice.ingest_route_updates();
    alice.set_route_metric("carol:7003", 6);
    alice.check_liveness();
    let pending = alice.send_private("bob", "still waiting");
    assert!(!pending.is_empty());

    let before = alice.snapshot();
    assert_eq!(before.routing_table.len(), 3);
    assert_eq!(before.pending.len(), 1);
    assert_eq!(before.heartbeats.len(), 2);
    assert!(alice.save_snapshot());

    // ── Restart: new process, same directory ───────────────────────────
    let reopened = open(dir.path());
    let restarted = node(&reopened, "alice", 7001);
    assert_eq!(restarted.routing_table().len(), 1);

    assert!(restarted.load_snapshot());
    let after = restarted.snapshot();
    assert_eq!(after.routing_table, before.routing_table);
    assert_eq!(after.pending, before.pending);
    assert_eq!(after.heartbeats, before.heartbeats);
    assert_eq!(
        restarted.delivery_status(&pending).status,
        DeliveryStatus::Pending
    );
    assert_eq!(restarted.get_route("carol:7003").unwrap().metric, 6);
}

#[test]
fn restore_rediscovers_live_peers() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path());
    let alice = node(&store, "alice", 7001);
    let bob = node(&store, "bob", 7002);

    bob.publish_heartbeat();
    assert_eq!(alice.check_liveness().len(), 1);
    assert!(alice.check_liveness().is_empty());
    alice.save_snapshot();

    let restarted = node(&store, "alice", 7001);
    let mut events = restarted.events().subscribe();
    restarted.load_snapshot();
    restarted.check_liveness();
    assert!(matches!(
        events.try_recv(),
        Some(MeshEvent::PeerDiscovered { node_id, .. }) if node_id == "bob"
    ));
}

#[test]
fn snapshot_is_readable_json() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path());
    let alice = node(&store, "alice", 7001);
    alice.save_snapshot();

    let data = store.read_full("snapshot.7001.alice").unwrap().unwrap();
    let snap = StateSnapshot::from_json(&data).unwrap();
    assert_eq!(snap.node_id, "alice");
    assert_eq!(snap.namespace, 7001);
    assert!(snap.role.is_coordinator());

    let json: serde_json::Value = serde_json::from_slice(&data).unwrap();
    assert_eq!(json["routing_table"]["alice:7001"]["metric"], 0);
}

#[test]
fn corrupt_snapshot_leaves_state_alone() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path());
    let alice = node(&store, "alice", 7001);
    alice.set_route_metric("bob:7002", 2);

    store.write_full("snapshot.7001.alice", b"{ truncated").unwrap();
    let mut events = alice.events().subscribe();
    assert!(!alice.load_snapshot());
    assert_eq!(alice.get_route("bob:7002").unwrap().metric, 2);
    assert!(matches!(events.try_recv(), Some(MeshEvent::Error { .. })));
}

#[test]
fn export_to_file() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path());
    let alice = node(&store, "alice", 7001);
    let bob = node(&store, "bob", 7002);
    let carol = node(&store, "carol", 7003);

    alice.send_broadcast("hello");
    bob.send_private("alice", "hi");
    carol.send_private("alice", "hey");
    carol.send_private("alice", "you there?");
    bob.send_private("carol", "private to carol");

    let out = dir.path().join("alice-export.json");
    assert!(alice.export_messages(Some(&out)));

    let json: serde_json::Value = serde_json::from_slice(&std::fs::read(&out).unwrap()).unwrap();
    assert_eq!(json["node_id"], "alice");
    assert_eq!(json["namespace"], 7001);
    assert_eq!(json["message_summary"]["total_broadcast"], 1);
    assert_eq!(json["message_summary"]["total_partners"], 2);
    assert_eq!(json["private_conversations"]["carol"].as_array().unwrap().len(), 2);
    assert!(json["private_conversations"].get("bob").is_some());
    assert!(json["export_time"].as_str().is_some());
}

#[test]
fn export_to_missing_directory_fails_softly() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path());
    let alice = node(&store, "alice", 7001);
    let out = dir.path().join("no/such/dir/export.json");
    assert!(!alice.export_messages(Some(&out)));
}
