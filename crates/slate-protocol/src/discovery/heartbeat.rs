/// HeartbeatMonitor: peer liveness over the shared store.
///
/// Each node overwrites its own heartbeat channel; observers scan every
/// heartbeat channel and derive liveness from record age. Two states only:
/// a record younger than the timeout is Alive, anything else is Dead.
/// A fresh heartbeat silently restores Alive.
///
/// Every record read refreshes an in-memory cache, which is what
/// `check_all` compares against the last reported state to produce
/// discovered / offline / online transitions exactly once each.
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use slate_store::ChannelStore;

use crate::channels;
use crate::discovery::types::*;
use crate::error::SlateProtocolError;
use crate::types::{now_ms, validate_peer_id, NodeId};

/// Publishes this node's heartbeat and tracks everyone else's.
pub struct HeartbeatMonitor {
    store: Arc<dyn ChannelStore>,
    local: NodeId,
    /// Liveness timeout in ms.
    timeout_ms: u64,
    /// Last readable record per route key.
    cache: Mutex<BTreeMap<String, HeartbeatRecord>>,
    /// Last liveness reported by `check_all`, per route key.
    reported: Mutex<HashMap<String, LivenessState>>,
}

impl HeartbeatMonitor {
    /// Create a monitor with the default timeout.
    pub fn new(store: Arc<dyn ChannelStore>, local: NodeId) -> Self {
        Self::with_timeout(store, local, HEARTBEAT_TIMEOUT_MS)
    }

    /// Create with a custom timeout (observers, tests).
    pub fn with_timeout(store: Arc<dyn ChannelStore>, local: NodeId, timeout_ms: u64) -> Self {
        Self {
            store,
            local,
            timeout_ms,
            cache: Mutex::new(BTreeMap::new()),
            reported: Mutex::new(HashMap::new()),
        }
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    /// Overwrite our heartbeat channel with a fresh record.
    pub fn publish(&self) -> Result<HeartbeatRecord, SlateProtocolError> {
        self.publish_at(now_ms())
    }

    /// Publish with a specific timestamp (for testing).
    pub fn publish_at(&self, now: u64) -> Result<HeartbeatRecord, SlateProtocolError> {
        let record = HeartbeatRecord::new(&self.local, now);
        let data = serde_json::to_vec(&record)?;
        let channel = channels::heartbeat(self.local.namespace(), self.local.id());
        self.store.write_full(&channel, &data)?;
        self.remember(&record);
        tracing::trace!(node = %self.local, timestamp = now, "heartbeat published");
        Ok(record)
    }

    /// Liveness of one peer, read straight from its heartbeat channel.
    ///
    /// A missing or corrupt record yields a not-alive status with no
    /// `last_seen`.
    pub fn status(&self, peer_id: &str, namespace: u16) -> Result<PeerStatus, SlateProtocolError> {
        self.status_at(peer_id, namespace, now_ms())
    }

    /// Peer status at a specific time (for testing).
    pub fn status_at(
        &self,
        peer_id: &str,
        namespace: u16,
        now: u64,
    ) -> Result<PeerStatus, SlateProtocolError> {
        validate_peer_id(peer_id)?;
        let channel = channels::heartbeat(namespace, peer_id);
        let Some(data) = self.store.read_full(&channel)? else {
            return Ok(PeerStatus::unknown());
        };
        let Some(record) = parse_record(&channel, &data, now) else {
            return Ok(PeerStatus::unknown());
        };
        self.remember(&record);

        let age = record.age_ms(now);
        Ok(PeerStatus {
            alive: age < self.timeout_ms,
            last_seen: Some(record.timestamp),
            age_ms: Some(age),
        })
    }

    /// Every peer (self included) with a heartbeat younger than `timeout_ms`,
    /// freshest first.
    pub fn active_peers(&self, timeout_ms: u64) -> Result<Vec<ActivePeer>, SlateProtocolError> {
        self.active_peers_at(timeout_ms, now_ms())
    }

    /// Active peers at a specific time (for testing).
    pub fn active_peers_at(
        &self,
        timeout_ms: u64,
        now: u64,
    ) -> Result<Vec<ActivePeer>, SlateProtocolError> {
        let mut active: Vec<ActivePeer> = self
            .scan_at(now)?
            .into_iter()
            .filter_map(|record| {
                let age = record.age_ms(now);
                (age < timeout_ms).then(|| ActivePeer {
                    node_id: record.node_id,
                    namespace: record.namespace,
                    role: record.role,
                    last_seen: record.timestamp,
                    age_ms: age,
                })
            })
            .collect();
        active.sort_by(|a, b| a.age_ms.cmp(&b.age_ms).then_with(|| a.node_id.cmp(&b.node_id)));
        Ok(active)
    }

    /// Read every heartbeat channel, skipping unreadable or malformed ones.
    pub fn scan_at(&self, now: u64) -> Result<Vec<HeartbeatRecord>, SlateProtocolError> {
        let mut records = Vec::new();
        for channel in self.store.list_channels(channels::HEARTBEAT_PREFIX)? {
            let data = match self.store.read_full(&channel) {
                Ok(Some(data)) => data,
                // Deleted between list and read
                Ok(None) => continue,
                Err(e) => {
                    tracing::debug!(channel, "skipping unreadable heartbeat: {e}");
                    continue;
                }
            };
            if let Some(record) = parse_record(&channel, &data, now) {
                self.remember(&record);
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Liveness of a peer according to the cache only (no I/O).
    pub fn liveness_at(&self, route_key: &str, now: u64) -> LivenessState {
        self.cache
            .lock()
            .get(route_key)
            .map_or(LivenessState::Dead, |r| r.liveness_at(now, self.timeout_ms))
    }

    /// Scan the store and report liveness transitions since the last call.
    pub fn check_all(&self) -> Result<Vec<DiscoveryEvent>, SlateProtocolError> {
        self.check_all_at(now_ms())
    }

    /// Check all peers at a specific time (for testing).
    ///
    /// If the scan fails, nothing is reported: a store outage must not
    /// look like every peer going offline.
    pub fn check_all_at(&self, now: u64) -> Result<Vec<DiscoveryEvent>, SlateProtocolError> {
        self.scan_at(now)?;

        let self_key = self.local.route_key();
        let states: Vec<(String, HeartbeatRecord, LivenessState)> = self
            .cache
            .lock()
            .iter()
            .filter(|(key, _)| **key != self_key)
            .map(|(key, r)| (key.clone(), r.clone(), r.liveness_at(now, self.timeout_ms)))
            .collect();

        let mut reported = self.reported.lock();
        let mut events = Vec::new();
        for (key, record, state) in states {
            let previous = reported.get(&key).copied();
            let event = match (previous, state) {
                (None, LivenessState::Alive) => Some(DiscoveryEvent::PeerDiscovered {
                    node_id: record.node_id,
                    namespace: record.namespace,
                    role: record.role,
                }),
                (Some(LivenessState::Alive), LivenessState::Dead) => {
                    Some(DiscoveryEvent::PeerOffline {
                        node_id: record.node_id,
                        namespace: record.namespace,
                    })
                }
                (Some(LivenessState::Dead), LivenessState::Alive) => {
                    Some(DiscoveryEvent::PeerOnline {
                        node_id: record.node_id,
                        namespace: record.namespace,
                    })
                }
                // Never seen alive, or no change
                _ => None,
            };
            if let Some(event) = event {
                reported.insert(key, state);
                events.push(event);
            }
        }
        Ok(events)
    }

    /// Copy of the heartbeat cache, keyed by route key.
    pub fn cache(&self) -> BTreeMap<String, HeartbeatRecord> {
        self.cache.lock().clone()
    }

    /// Replace the cache wholesale (snapshot restore).
    ///
    /// Reported liveness is forgotten, so the next `check_all` reports
    /// every live peer as discovered again.
    pub fn replace_cache(&self, cache: BTreeMap<String, HeartbeatRecord>) {
        *self.cache.lock() = cache;
        self.reported.lock().clear();
    }

    fn remember(&self, record: &HeartbeatRecord) {
        let mut cache = self.cache.lock();
        let key = record.route_key();
        match cache.get(&key) {
            Some(existing) if existing.timestamp > record.timestamp => {}
            _ => {
                cache.insert(key, record.clone());
            }
        }
    }
}

fn parse_record(channel: &str, data: &[u8], now: u64) -> Option<HeartbeatRecord> {
    let record: HeartbeatRecord = match serde_json::from_slice(data) {
        Ok(record) => record,
        Err(e) => {
            tracing::debug!(channel, "skipping malformed heartbeat: {e}");
            return None;
        }
    };
    if !record.is_timestamp_valid(now) {
        tracing::debug!(channel, timestamp = record.timestamp, "skipping heartbeat from the future");
        return None;
    }
    Some(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;
    use slate_store::MemoryStore;

    fn monitor(store: &MemoryStore, id: &str) -> HeartbeatMonitor {
        HeartbeatMonitor::new(
            Arc::new(store.clone()),
            NodeId::participant(id, 7001).unwrap(),
        )
    }

    #[test]
    fn publish_writes_own_channel() {
        let store = MemoryStore::new();
        let alice = monitor(&store, "alice");
        alice.publish_at(1_000).unwrap();

        let data = store.read_full("heartbeat.7001.alice").unwrap().unwrap();
        let record: HeartbeatRecord = serde_json::from_slice(&data).unwrap();
        assert_eq!(record.timestamp, 1_000);
        assert_eq!(record.role, Role::Participant);
    }

    #[test]
    fn status_alive_then_dead() {
        let store = MemoryStore::new();
        let alice = monitor(&store, "alice");
        let bob = monitor(&store, "bob");
        alice.publish_at(1_000).unwrap();

        let st = bob.status_at("alice", 7001, 5_000).unwrap();
        assert!(st.alive);
        assert_eq!(st.last_seen, Some(1_000));
        assert_eq!(st.age_ms, Some(4_000));

        let st = bob.status_at("alice", 7001, 11_000).unwrap();
        assert!(!st.alive);
        assert_eq!(st.last_seen, Some(1_000));
    }

    #[test]
    fn fresh_heartbeat_restores_alive() {
        let store = MemoryStore::new();
        let alice = monitor(&store, "alice");
        let bob = monitor(&store, "bob");

        alice.publish_at(1_000).unwrap();
        assert!(!bob.status_at("alice", 7001, 20_000).unwrap().alive);
        alice.publish_at(20_000).unwrap();
        assert!(bob.status_at("alice", 7001, 20_500).unwrap().alive);
    }

    #[test]
    fn missing_and_corrupt_are_unknown() {
        let store = MemoryStore::new();
        let bob = monitor(&store, "bob");
        assert_eq!(bob.status_at("ghost", 7001, 1).unwrap(), PeerStatus::unknown());

        store.write_full("heartbeat.7001.carol", b"{not json").unwrap();
        assert_eq!(bob.status_at("carol", 7001, 1).unwrap(), PeerStatus::unknown());
    }

    #[test]
    fn invalid_peer_id_is_rejected() {
        let store = MemoryStore::new();
        let bob = monitor(&store, "bob");
        assert!(bob.status_at("../x", 7001, 1).is_err());
    }

    #[test]
    fn active_peers_sorted_freshest_first() {
        let store = MemoryStore::new();
        let alice = monitor(&store, "alice");
        let bob = monitor(&store, "bob");
        let carol = monitor(&store, "carol");

        alice.publish_at(1_000).unwrap();
        bob.publish_at(3_000).unwrap();
        carol.publish_at(2_000).unwrap();
        store.write_full("heartbeat.7001.junk", b"garbage").unwrap();

        let active = alice.active_peers_at(10_000, 4_000).unwrap();
        let ids: Vec<&str> = active.iter().map(|p| p.node_id.as_str()).collect();
        assert_eq!(ids, ["bob", "carol", "alice"]);
        assert_eq!(active[0].age_ms, 1_000);

        // alice's heartbeat (age 10s) falls out exactly at the threshold
        let active = alice.active_peers_at(10_000, 11_000).unwrap();
        assert_eq!(active.len(), 2);
    }

    #[test]
    fn check_all_reports_transitions_once() {
        let store = MemoryStore::new();
        let alice = monitor(&store, "alice");
        let bob = monitor(&store, "bob");
        alice.publish_at(0).unwrap();
        bob.publish_at(1_000).unwrap();

        let events = alice.check_all_at(2_000).unwrap();
        assert_eq!(
            events,
            vec![DiscoveryEvent::PeerDiscovered {
                node_id: "bob".into(),
                namespace: 7001,
                role: Role::Participant,
            }]
        );
        assert!(alice.check_all_at(3_000).unwrap().is_empty());

        let events = alice.check_all_at(12_000).unwrap();
        assert_eq!(
            events,
            vec![DiscoveryEvent::PeerOffline {
                node_id: "bob".into(),
                namespace: 7001,
            }]
        );
        assert!(alice.check_all_at(13_000).unwrap().is_empty());

        bob.publish_at(14_000).unwrap();
        let events = alice.check_all_at(14_500).unwrap();
        assert_eq!(
            events,
            vec![DiscoveryEvent::PeerOnline {
                node_id: "bob".into(),
                namespace: 7001,
            }]
        );
    }

    #[test]
    fn check_all_ignores_self_and_never_alive() {
        let store = MemoryStore::new();
        let alice = monitor(&store, "alice");
        let bob = monitor(&store, "bob");
        alice.publish_at(0).unwrap();
        bob.publish_at(0).unwrap();

        // bob was already dead when first seen
        assert!(alice.check_all_at(60_000).unwrap().is_empty());
    }

    #[test]
    fn check_all_silent_on_store_outage() {
        let store = MemoryStore::new();
        let alice = monitor(&store, "alice");
        let bob = monitor(&store, "bob");
        bob.publish_at(0).unwrap();
        assert_eq!(alice.check_all_at(1_000).unwrap().len(), 1);

        store.set_fail_reads(true);
        assert!(alice.check_all_at(60_000).is_err());
    }

    #[test]
    fn replace_cache_resets_reports() {
        let store = MemoryStore::new();
        let alice = monitor(&store, "alice");
        let bob = monitor(&store, "bob");
        bob.publish_at(0).unwrap();
        assert_eq!(alice.check_all_at(1_000).unwrap().len(), 1);

        let saved = alice.cache();
        assert!(saved.contains_key("bob:7001"));
        alice.replace_cache(saved);
        assert_eq!(alice.check_all_at(1_000).unwrap().len(), 1);
        assert_eq!(alice.liveness_at("bob:7001", 1_000), LivenessState::Alive);
        assert_eq!(alice.liveness_at("nobody:1", 1_000), LivenessState::Dead);
    }
}
