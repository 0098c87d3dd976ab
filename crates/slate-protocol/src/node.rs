/// PeerNode: one mesh participant over a shared channel store.
///
/// Owns one of each component (registry, heartbeat monitor, routing engine,
/// delivery tracker, message store) plus the event bus, and exposes the
/// soft-failing API applications use: every store or serialization error is
/// logged, published as `MeshEvent::Error`, and turned into a sentinel
/// (`false`, empty id, empty list). Nothing here panics on I/O.
///
/// All state sits behind `parking_lot` mutexes inside the components, so a
/// node is `Send + Sync` and shared as `Arc<PeerNode>` between the periodic
/// runtime tasks and the application.
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use slate_store::ChannelStore;

use crate::channels;
use crate::discovery::{
    ActivePeer, DiscoveryEvent, HeartbeatMonitor, PeerStatus, HEARTBEAT_TIMEOUT_MS,
};
use crate::error::SlateProtocolError;
use crate::events::{EventBus, MeshEvent, DEFAULT_EVENT_CAPACITY};
use crate::health::{MessageState, PeerInfo, RoutingState, SystemHealth, SystemState};
use crate::messages::{Message, MessageStore};
use crate::registry::PeerRegistry;
use crate::retry::RetryPolicy;
use crate::routing::{RouteEntry, RoutingAnnouncement, RoutingEngine, RoutingTable, ANNOUNCEMENT_RETENTION_MS};
use crate::snapshot::{self, StateSnapshot};
use crate::tracker::{
    DeliveryReport, DeliveryTracker, StatusChange, ACK_MARKER_MAX_AGE_MS, DELIVERY_TIMEOUT_MS,
    MAX_AGE_MS,
};
use crate::types::{now_ms, validate_peer_id, NodeId};

// ── Configuration ─────────────────────────────────────────────────────

/// Configuration for a [`PeerNode`].
///
/// ```rust
/// use std::time::Duration;
/// use slate_protocol::{NodeConfig, RetryPolicy};
///
/// let config = NodeConfig::new()
///     .heartbeat_timeout(Duration::from_secs(15))
///     .retry(RetryPolicy::new(5, Duration::from_millis(50)));
/// ```
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub(crate) heartbeat_timeout: Duration,
    pub(crate) delivery_timeout: Duration,
    pub(crate) announcement_retention: Duration,
    pub(crate) retry: RetryPolicy,
    pub(crate) event_capacity: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeConfig {
    pub fn new() -> Self {
        Self {
            heartbeat_timeout: Duration::from_millis(HEARTBEAT_TIMEOUT_MS),
            delivery_timeout: Duration::from_millis(DELIVERY_TIMEOUT_MS),
            announcement_retention: Duration::from_millis(ANNOUNCEMENT_RETENTION_MS),
            retry: RetryPolicy::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    /// A peer whose heartbeat is older than this is considered dead.
    pub fn heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = timeout;
        self
    }

    /// An unacknowledged message expires after this long.
    pub fn delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout = timeout;
        self
    }

    /// Announcement log lines older than this are pruned.
    pub fn announcement_retention(mut self, retention: Duration) -> Self {
        self.announcement_retention = retention;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Per-subscriber queue depth of the event bus.
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn heartbeat_timeout_ms(&self) -> u64 {
        self.heartbeat_timeout.as_millis() as u64
    }
}

// ── PeerNode ──────────────────────────────────────────────────────────

pub struct PeerNode {
    id: NodeId,
    store: Arc<dyn ChannelStore>,
    config: NodeConfig,
    registry: PeerRegistry,
    heartbeat: HeartbeatMonitor,
    routing: RoutingEngine,
    tracker: DeliveryTracker,
    messages: MessageStore,
    events: EventBus<MeshEvent>,
}

impl PeerNode {
    /// Build a node. No I/O happens until the first operation.
    pub fn new(store: Arc<dyn ChannelStore>, id: NodeId, config: NodeConfig) -> Self {
        let retry = config.retry;
        Self {
            registry: PeerRegistry::new(store.clone(), id.id(), retry),
            heartbeat: HeartbeatMonitor::with_timeout(
                store.clone(),
                id.clone(),
                config.heartbeat_timeout_ms(),
            ),
            routing: RoutingEngine::with_retention(
                store.clone(),
                id.clone(),
                retry,
                config.announcement_retention.as_millis() as u64,
            ),
            tracker: DeliveryTracker::with_timeout(
                store.clone(),
                id.id(),
                config.delivery_timeout.as_millis() as u64,
            ),
            messages: MessageStore::new(store.clone(), id.id(), retry),
            events: EventBus::new(config.event_capacity),
            id,
            store,
            config,
        }
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn ChannelStore> {
        &self.store
    }

    /// Mesh events (peer transitions, routes, messages, deliveries, errors).
    pub fn events(&self) -> &EventBus<MeshEvent> {
        &self.events
    }

    pub fn heartbeat(&self) -> &HeartbeatMonitor {
        &self.heartbeat
    }

    pub fn routing(&self) -> &RoutingEngine {
        &self.routing
    }

    pub fn tracker(&self) -> &DeliveryTracker {
        &self.tracker
    }

    pub fn messages(&self) -> &MessageStore {
        &self.messages
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    // ── Registry ───────────────────────────────────────────────────────

    /// Add this node to the shared registry. `false` if the update failed.
    pub fn register(&self) -> bool {
        self.soft("register", self.registry.register()).is_some()
    }

    pub fn registered_peers(&self) -> Vec<String> {
        self.soft("list registry", self.registry.registered())
            .unwrap_or_default()
    }

    /// Registered peers (self included) with a live heartbeat, freshest first.
    pub fn list_active_peers(&self, timeout: Duration) -> Vec<String> {
        let result = self
            .registry
            .list_active(&self.heartbeat, timeout.as_millis() as u64);
        self.soft("list active peers", result).unwrap_or_default()
    }

    /// Every live heartbeat, registered or not, with its age.
    pub fn active_heartbeats(&self, timeout: Duration) -> Vec<ActivePeer> {
        let result = self.heartbeat.active_peers(timeout.as_millis() as u64);
        self.soft("scan heartbeats", result).unwrap_or_default()
    }

    // ── Heartbeat ──────────────────────────────────────────────────────

    pub fn publish_heartbeat(&self) -> bool {
        self.soft("publish heartbeat", self.heartbeat.publish())
            .is_some()
    }

    pub fn peer_status(&self, peer_id: &str, namespace: u16) -> PeerStatus {
        self.soft("peer status", self.heartbeat.status(peer_id, namespace))
            .unwrap_or_else(PeerStatus::unknown)
    }

    /// Scan heartbeats and publish liveness transitions on the bus.
    pub fn check_liveness(&self) -> Vec<DiscoveryEvent> {
        let events = self
            .soft("check liveness", self.heartbeat.check_all())
            .unwrap_or_default();
        for event in &events {
            tracing::info!(node = %self.id, ?event, "peer liveness changed");
            self.events.publish(event.clone().into());
        }
        events
    }

    // ── Routing ────────────────────────────────────────────────────────

    pub fn broadcast_route_update(&self) -> bool {
        self.soft("broadcast routes", self.routing.broadcast_update())
            .is_some()
    }

    /// Merge every announcement. Publishes `RoutesChanged` when the table
    /// changed.
    pub fn ingest_route_updates(&self) -> bool {
        let changed = self
            .soft("ingest routes", self.routing.ingest_updates())
            .unwrap_or(false);
        if changed {
            self.events.publish(MeshEvent::RoutesChanged {
                table_size: self.routing.len(),
            });
        }
        changed
    }

    pub fn get_route(&self, destination: &str) -> Option<RouteEntry> {
        self.routing.get_route(destination)
    }

    /// `false` if `destination` is not a valid `"{id}:{namespace}"` key, or
    /// if it is this node's own key with a metric other than 0.
    pub fn set_route_metric(&self, destination: &str, metric: u32) -> bool {
        let valid = destination
            .split_once(':')
            .is_some_and(|(id, ns)| validate_peer_id(id).is_ok() && ns.parse::<u16>().is_ok());
        if !valid {
            tracing::warn!(destination, "refusing route with malformed destination");
            return false;
        }
        if metric != 0 && destination == self.id.route_key() {
            tracing::warn!(destination, metric, "refusing to change the self-route metric");
            return false;
        }
        self.routing.set_metric(destination, metric);
        true
    }

    pub fn routing_table(&self) -> RoutingTable {
        self.routing.table()
    }

    pub fn latest_announcements(&self) -> Vec<RoutingAnnouncement> {
        self.soft("read announcements", self.routing.latest_announcements())
            .unwrap_or_default()
    }

    // ── Messages ───────────────────────────────────────────────────────

    /// Append a broadcast and start tracking it. Empty id on failure.
    pub fn send_broadcast(&self, body: &str) -> String {
        let sent = self.soft("send broadcast", self.messages.send_broadcast(body));
        self.track_sent(sent)
    }

    /// Append to the private log shared with `peer`. Empty id on failure.
    pub fn send_private(&self, peer: &str, body: &str) -> String {
        let sent = self.soft("send private", self.messages.send_private(peer, body));
        self.track_sent(sent)
    }

    fn track_sent(&self, sent: Option<String>) -> String {
        match sent {
            Some(message_id) => {
                self.tracker.track(&message_id);
                message_id
            }
            None => String::new(),
        }
    }

    pub fn read_broadcast(&self) -> Vec<String> {
        self.messages.read_broadcast()
    }

    /// The private log shared with `peer`.
    pub fn read_private(&self, peer: &str) -> Vec<String> {
        self.messages.read_private(self.id.id(), peer)
    }

    pub fn read_all_for(&self, viewer: &str) -> Vec<String> {
        self.messages.read_all_for(viewer)
    }

    /// Everything this node can read, oldest first.
    pub fn read_all(&self) -> Vec<String> {
        self.messages.read_all_for(self.id.id())
    }

    pub fn discover_participants(&self, viewer: &str) -> Vec<String> {
        self.messages.discover_participants(viewer)
    }

    pub fn known_senders(&self) -> Vec<String> {
        self.messages.known_senders()
    }

    pub fn clear_broadcast(&self) -> bool {
        self.soft("clear broadcast", self.messages.clear_broadcast())
            .is_some()
    }

    pub fn clear_private(&self, peer: &str) -> bool {
        self.soft("clear private", self.messages.clear_private(self.id.id(), peer))
            .is_some()
    }

    /// Publish `MessageReceived` for every message not in `seen`, and
    /// acknowledge the ones other nodes sent. Returns how many were new.
    pub fn poll_messages(&self, seen: &mut HashSet<String>) -> usize {
        let mut new = 0;
        for line in self.read_all() {
            let Some(message) = Message::parse_line(&line) else {
                continue;
            };
            if !seen.insert(message.message_id.clone()) {
                continue;
            }
            if message.sender == self.id.id() {
                continue;
            }
            new += 1;
            self.acknowledge(&message.message_id);
            self.events.publish(MeshEvent::MessageReceived {
                message_id: message.message_id,
                sender: message.sender,
                line,
            });
        }
        new
    }

    // ── Delivery ───────────────────────────────────────────────────────

    /// Receiver side: mark a message as received.
    pub fn acknowledge(&self, message_id: &str) -> bool {
        self.soft("acknowledge", self.tracker.acknowledge(message_id))
            .is_some()
    }

    pub fn delivery_status(&self, message_id: &str) -> DeliveryReport {
        self.tracker.status(message_id)
    }

    /// Publish `DeliveryChanged` for every status transition since the last
    /// poll.
    pub fn poll_deliveries(&self) -> Vec<StatusChange> {
        let changes = self.tracker.poll_changes();
        for change in &changes {
            tracing::debug!(
                message_id = %change.message_id,
                previous = ?change.previous,
                current = ?change.current,
                "delivery status changed"
            );
            self.events.publish(change.clone().into());
        }
        changes
    }

    /// Evict day-old delivery records and hour-old ack markers.
    pub fn maintenance(&self) {
        let evicted = self.tracker.evict_older_than(MAX_AGE_MS);
        let pruned = self
            .soft("prune ack markers", self.tracker.prune_ack_markers(ACK_MARKER_MAX_AGE_MS))
            .unwrap_or(0);
        tracing::debug!(evicted, pruned, "maintenance done");
    }

    // ── Snapshot ───────────────────────────────────────────────────────

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            node_id: self.id.id().to_string(),
            namespace: self.id.namespace(),
            role: self.id.role(),
            saved_at: now_ms(),
            routing_table: self.routing.table(),
            pending: self.tracker.records(),
            heartbeats: self.heartbeat.cache(),
        }
    }

    pub fn save_snapshot(&self) -> bool {
        let channel = channels::snapshot(self.id.namespace(), self.id.id());
        let result = snapshot::save(self.store.as_ref(), &channel, &self.snapshot());
        self.soft("save snapshot", result).is_some()
    }

    /// Replace routing, delivery and heartbeat state with the saved snapshot.
    /// `false` if there is none or it is unreadable.
    pub fn load_snapshot(&self) -> bool {
        let channel = channels::snapshot(self.id.namespace(), self.id.id());
        match self.soft("load snapshot", snapshot::load(self.store.as_ref(), &channel)) {
            Some(Some(snap)) => {
                self.routing.replace_table(snap.routing_table);
                self.tracker.replace_records(snap.pending);
                self.heartbeat.replace_cache(snap.heartbeats);
                tracing::info!(node = %self.id, saved_at = snap.saved_at, "snapshot restored");
                true
            }
            Some(None) => {
                tracing::debug!(node = %self.id, "no snapshot to restore");
                false
            }
            None => false,
        }
    }

    /// Write everything this node can read as JSON, to `path` if given,
    /// otherwise to the node's export channel.
    pub fn export_messages(&self, path: Option<&Path>) -> bool {
        let export = self.messages.export(self.id.id(), self.id.namespace());
        let result = match path {
            Some(path) => snapshot::write_export_file(&export, path),
            None => snapshot::write_export_channel(
                self.store.as_ref(),
                &channels::export(self.id.namespace(), self.id.id()),
                &export,
            ),
        };
        self.soft("export messages", result).is_some()
    }

    // ── Health ─────────────────────────────────────────────────────────

    pub fn system_health(&self) -> SystemHealth {
        let active = self.active_heartbeats(self.config.heartbeat_timeout);
        let counts = self.tracker.counts_at(now_ms());
        SystemHealth::from_parts(&active, counts, self.routing.len())
    }

    pub fn system_state(&self) -> SystemState {
        let network_state = self.system_health();
        let table = self.routing.table();
        SystemState {
            peer_info: PeerInfo {
                node_id: self.id.id().to_string(),
                namespace: self.id.namespace(),
                role: self.id.role(),
                timestamp: now_ms(),
            },
            message_state: MessageState {
                pending_acks: network_state.pending_acks,
                active_conversations: self.discover_participants(self.id.id()).len(),
                broadcast_count: self.read_broadcast().len(),
            },
            routing_state: RoutingState {
                routing_table_size: table.len(),
                routes: table.sorted_entries(),
            },
            network_state,
        }
    }

    // ── Internal ───────────────────────────────────────────────────────

    fn soft<T>(&self, op: &str, result: Result<T, SlateProtocolError>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(node = %self.id, "{op} failed: {e}");
                self.events.publish(MeshEvent::Error {
                    description: format!("{op} failed: {e}"),
                });
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::DeliveryStatus;
    use slate_store::MemoryStore;

    fn node(store: &MemoryStore, id: &str, ns: u16) -> PeerNode {
        PeerNode::new(
            Arc::new(store.clone()),
            NodeId::participant(id, ns).unwrap(),
            NodeConfig::new().retry(RetryPolicy::immediate(3)),
        )
    }

    #[test]
    fn config_defaults() {
        let config = NodeConfig::default();
        assert_eq!(config.heartbeat_timeout, Duration::from_secs(10));
        assert_eq!(config.delivery_timeout, Duration::from_secs(30));
        assert_eq!(config.announcement_retention, Duration::from_secs(3600));
        assert_eq!(config.retry, RetryPolicy::default());
    }

    #[test]
    fn new_node_has_self_route() {
        let store = MemoryStore::new();
        let alice = node(&store, "alice", 7001);
        assert_eq!(alice.get_route("alice:7001").unwrap().metric, 0);
        assert_eq!(store.channel_count(), 0);
    }

    #[test]
    fn send_tracks_and_ack_resolves() {
        let store = MemoryStore::new();
        let alice = node(&store, "alice", 7001);
        let bob = node(&store, "bob", 7002);

        let id = alice.send_private("bob", "hello");
        assert_eq!(id.len(), 8);
        assert_eq!(alice.delivery_status(&id).status, DeliveryStatus::Pending);

        let mut seen = HashSet::new();
        assert_eq!(bob.poll_messages(&mut seen), 1);
        assert_eq!(bob.poll_messages(&mut seen), 0);
        assert_eq!(alice.delivery_status(&id).status, DeliveryStatus::Acknowledged);
    }

    #[test]
    fn own_messages_not_acknowledged() {
        let store = MemoryStore::new();
        let alice = node(&store, "alice", 7001);
        let id = alice.send_broadcast("hi all");
        let mut seen = HashSet::new();
        assert_eq!(alice.poll_messages(&mut seen), 0);
        assert!(store.read_full(&channels::ack(&id)).unwrap().is_none());
    }

    #[test]
    fn failures_become_sentinels_and_events() {
        let store = MemoryStore::new();
        let alice = node(&store, "alice", 7001);
        let mut sub = alice.events().subscribe();

        store.set_fail_writes(true);
        assert!(!alice.register());
        assert_eq!(alice.send_broadcast("x"), "");
        assert!(!alice.publish_heartbeat());
        assert!(!alice.save_snapshot());

        let Some(MeshEvent::Error { description }) = sub.try_recv() else {
            panic!("expected an error event");
        };
        assert!(description.starts_with("register failed"));
        assert!(alice.tracker().is_empty());
    }

    #[test]
    fn set_route_metric_validates_destination() {
        let store = MemoryStore::new();
        let alice = node(&store, "alice", 7001);
        assert!(alice.set_route_metric("bob:7002", 4));
        assert_eq!(alice.get_route("bob:7002").unwrap().metric, 4);
        assert!(!alice.set_route_metric("bob", 4));
        assert!(!alice.set_route_metric("b/ob:1", 4));
        assert!(!alice.set_route_metric("bob:notaport", 4));
    }

    #[test]
    fn self_route_cannot_be_overridden() {
        let store = MemoryStore::new();
        let alice = node(&store, "alice", 7001);
        assert!(!alice.set_route_metric("alice:7001", 5));
        let own = alice.get_route("alice:7001").unwrap();
        assert_eq!(own.metric, 0);
        assert_eq!(own.next_hop, "alice");

        // Re-seeding at 0 is allowed, and another namespace is another node
        assert!(alice.set_route_metric("alice:7001", 0));
        assert!(alice.set_route_metric("alice:7002", 5));
        assert_eq!(alice.get_route("alice:7001").unwrap().metric, 0);
    }

    #[test]
    fn send_is_tracked_when_tracker_is_full() {
        let store = MemoryStore::new();
        let alice = node(&store, "alice", 7001);
        let now = now_ms();
        for i in 0..10_000 {
            alice.tracker().track_at(&format!("old-{i}"), now);
        }

        let id = alice.send_broadcast("x");
        assert!(!id.is_empty());
        assert_eq!(alice.delivery_status(&id).status, DeliveryStatus::Pending);
    }

    #[test]
    fn load_without_snapshot_is_false() {
        let store = MemoryStore::new();
        assert!(!node(&store, "alice", 7001).load_snapshot());
    }

    #[test]
    fn export_to_channel_when_no_path() {
        let store = MemoryStore::new();
        let alice = node(&store, "alice", 7001);
        alice.send_broadcast("hello");
        assert!(alice.export_messages(None));
        let data = store.read_full("export.7001.alice").unwrap().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&data).unwrap();
        assert_eq!(json["message_summary"]["total_broadcast"], 1);
    }

    #[test]
    fn health_and_state() {
        let store = MemoryStore::new();
        let alice = node(&store, "alice", 7001);
        let bob = node(&store, "bob", 7002);
        alice.publish_heartbeat();
        bob.publish_heartbeat();
        alice.send_private("bob", "hi");
        alice.send_broadcast("all");

        let health = alice.system_health();
        assert_eq!(health.active_peers, 2);
        assert_eq!(health.pending_acks, 2);
        assert_eq!(health.routing_table_size, 1);

        let state = alice.system_state();
        assert_eq!(state.peer_info.node_id, "alice");
        assert_eq!(state.message_state.active_conversations, 1);
        assert_eq!(state.message_state.broadcast_count, 1);
        assert_eq!(state.routing_state.routes.len(), 1);
    }

    #[test]
    fn routes_changed_event_on_ingest() {
        let store = MemoryStore::new();
        let alice = node(&store, "alice", 7001);
        let bob = node(&store, "bob", 7002);
        let mut sub = alice.events().subscribe();

        assert!(bob.broadcast_route_update());
        assert!(alice.ingest_route_updates());
        assert_eq!(
            sub.try_recv(),
            Some(MeshEvent::RoutesChanged { table_size: 2 })
        );
        assert!(!alice.ingest_route_updates());
        assert_eq!(sub.try_recv(), None);
    }
}
