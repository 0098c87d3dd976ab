/// Discovery module for Slate.
///
/// Heartbeat publication, liveness derivation and transition reporting
/// over the shared channel store.

pub mod heartbeat;
pub mod types;

pub use heartbeat::HeartbeatMonitor;
pub use types::{
    ActivePeer, DiscoveryEvent, HeartbeatRecord, LivenessState, PeerStatus,
    HEARTBEAT_INTERVAL_MS, HEARTBEAT_TIMEOUT_MS, MAX_FUTURE_DRIFT_MS, OBSERVER_TIMEOUT_MS,
};
