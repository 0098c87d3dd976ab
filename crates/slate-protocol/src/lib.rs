//! Slate protocol layer.
//!
//! Peer registry, heartbeat liveness, distance-vector routing, delivery
//! tracking and message logs for a small mesh of nodes that share nothing
//! but a `slate-store` channel store.
//!
//! Wire format: JSON records and human-readable display lines.
//! Consistency: none from the store; bounded optimistic retry on every
//! read-modify-write, last write wins across nodes.
//!
//! # Quick start
//!
//! ```rust
//! use std::sync::Arc;
//! use slate_protocol::{NodeConfig, NodeId, PeerNode};
//! use slate_store::MemoryStore;
//!
//! let store = Arc::new(MemoryStore::new());
//! let alice = PeerNode::new(store.clone(), NodeId::coordinator("alice", 7001).unwrap(), NodeConfig::new());
//! let bob = PeerNode::new(store, NodeId::participant("bob", 7002).unwrap(), NodeConfig::new());
//!
//! assert!(alice.register());
//! let id = alice.send_private("bob", "welcome");
//! assert_eq!(bob.read_private("alice").len(), 1);
//! assert!(bob.acknowledge(&id));
//! ```

pub mod channels;
pub mod discovery;
pub mod error;
pub mod events;
pub mod health;
pub mod logging;
pub mod messages;
pub mod node;
pub mod registry;
pub mod retry;
pub mod routing;
pub mod runtime;
pub mod snapshot;
pub mod tracker;
pub mod types;

pub use discovery::{
    ActivePeer, DiscoveryEvent, HeartbeatMonitor, HeartbeatRecord, LivenessState, PeerStatus,
};
pub use error::SlateProtocolError;
pub use events::{EventBus, MeshEvent, Subscription, SubscriptionId};
pub use health::{SystemHealth, SystemState};
pub use logging::{BusLayer, LogRecord};
pub use messages::{Message, MessageExport, MessageStore};
pub use node::{NodeConfig, PeerNode};
pub use registry::PeerRegistry;
pub use retry::RetryPolicy;
pub use routing::{RouteEntry, RoutingAnnouncement, RoutingEngine, RoutingTable};
pub use runtime::{NodeRuntime, RuntimeConfig, RuntimeHandle};
pub use snapshot::StateSnapshot;
pub use tracker::{DeliveryReport, DeliveryStatus, DeliveryTracker, PendingDelivery, StatusChange};
pub use types::{now_ms, route_key, NodeId, Role};
