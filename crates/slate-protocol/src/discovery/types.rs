/// Discovery types for Slate.
///
/// What a node publishes about itself on its heartbeat channel, and what
/// observers derive from it. Liveness is never stored, only computed from
/// the age of the last record.
use serde::{Deserialize, Serialize};

use crate::types::{route_key, NodeId, Role};

// ── Constants ────────────────────────────────────────────────────────────

/// Heartbeat interval (5 seconds).
pub const HEARTBEAT_INTERVAL_MS: u64 = 5_000;

/// Default liveness timeout: two missed heartbeats (10s).
pub const HEARTBEAT_TIMEOUT_MS: u64 = 10_000;

/// Timeout used by passive observers that poll less often (12s).
pub const OBSERVER_TIMEOUT_MS: u64 = 12_000;

/// Maximum allowed clock drift for heartbeat timestamps (5 minutes).
pub const MAX_FUTURE_DRIFT_MS: u64 = 5 * 60 * 1000;

// ── HeartbeatRecord ──────────────────────────────────────────────────────

/// Content of a heartbeat channel, overwritten every cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatRecord {
    pub node_id: String,
    pub namespace: u16,
    /// Publication time (Unix ms).
    pub timestamp: u64,
    pub role: Role,
}

impl HeartbeatRecord {
    pub fn new(node: &NodeId, timestamp: u64) -> Self {
        Self {
            node_id: node.id().to_string(),
            namespace: node.namespace(),
            timestamp,
            role: node.role(),
        }
    }

    pub fn route_key(&self) -> String {
        route_key(&self.node_id, self.namespace)
    }

    /// Age of the record at `now`. Records from the future have age 0.
    pub fn age_ms(&self, now: u64) -> u64 {
        now.saturating_sub(self.timestamp)
    }

    pub fn liveness_at(&self, now: u64, timeout_ms: u64) -> LivenessState {
        if self.age_ms(now) < timeout_ms {
            LivenessState::Alive
        } else {
            LivenessState::Dead
        }
    }

    /// Whether the timestamp is within acceptable clock drift.
    pub fn is_timestamp_valid(&self, now: u64) -> bool {
        self.timestamp <= now.saturating_add(MAX_FUTURE_DRIFT_MS)
    }
}

// ── Liveness ─────────────────────────────────────────────────────────────

/// Derived liveness of a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LivenessState {
    /// Heartbeat younger than the timeout.
    Alive,
    /// Heartbeat missing, corrupt or too old.
    Dead,
}

/// Point-in-time liveness report for one peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PeerStatus {
    pub alive: bool,
    /// Timestamp of the last readable heartbeat (Unix ms).
    pub last_seen: Option<u64>,
    pub age_ms: Option<u64>,
}

impl PeerStatus {
    pub fn unknown() -> Self {
        Self {
            alive: false,
            last_seen: None,
            age_ms: None,
        }
    }
}

/// A peer with a live heartbeat, as returned by active-peer scans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivePeer {
    pub node_id: String,
    pub namespace: u16,
    pub role: Role,
    pub last_seen: u64,
    pub age_ms: u64,
}

// ── DiscoveryEvent ───────────────────────────────────────────────────────

/// Liveness transitions reported by the heartbeat monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    /// First live heartbeat seen from this peer.
    PeerDiscovered {
        node_id: String,
        namespace: u16,
        role: Role,
    },
    /// A previously live peer stopped heartbeating.
    PeerOffline { node_id: String, namespace: u16 },
    /// A peer reported offline is heartbeating again.
    PeerOnline { node_id: String, namespace: u16 },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(ts: u64) -> HeartbeatRecord {
        HeartbeatRecord::new(&NodeId::participant("alice", 7001).unwrap(), ts)
    }

    #[test]
    fn liveness_threshold() {
        let hb = record(1_000);
        assert_eq!(hb.liveness_at(1_000, 10_000), LivenessState::Alive);
        assert_eq!(hb.liveness_at(10_999, 10_000), LivenessState::Alive);
        assert_eq!(hb.liveness_at(11_000, 10_000), LivenessState::Dead);
    }

    #[test]
    fn future_record_has_zero_age() {
        let hb = record(5_000);
        assert_eq!(hb.age_ms(1_000), 0);
        assert!(hb.is_timestamp_valid(1_000));

        let far = record(MAX_FUTURE_DRIFT_MS + 5_000);
        assert!(far.is_timestamp_valid(5_000));
        assert!(!far.is_timestamp_valid(4_999));
    }

    #[test]
    fn wire_format() {
        let json = serde_json::to_value(record(42)).unwrap();
        assert_eq!(json["node_id"], "alice");
        assert_eq!(json["namespace"], 7001);
        assert_eq!(json["timestamp"], 42);
        assert_eq!(json["role"], "participant");
        assert_eq!(record(42).route_key(), "alice:7001");
    }
}
