//! Point-in-time health and state reports.

use serde::Serialize;

use crate::discovery::ActivePeer;
use crate::routing::RouteEntry;
use crate::tracker::DeliveryCounts;
use crate::types::Role;

/// Aggregate network health as seen by one node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemHealth {
    pub active_peers: usize,
    pub pending_acks: usize,
    pub successful_deliveries: usize,
    pub failed_deliveries: usize,
    pub routing_table_size: usize,
    /// Mean heartbeat age of active peers (ms). 0 when none are active.
    pub average_peer_response_ms: f64,
}

impl SystemHealth {
    pub fn from_parts(active: &[ActivePeer], deliveries: DeliveryCounts, routing_table_size: usize) -> Self {
        let average_peer_response_ms = if active.is_empty() {
            0.0
        } else {
            active.iter().map(|p| p.age_ms as f64).sum::<f64>() / active.len() as f64
        };
        Self {
            active_peers: active.len(),
            pending_acks: deliveries.pending,
            successful_deliveries: deliveries.acknowledged,
            failed_deliveries: deliveries.expired,
            routing_table_size,
            average_peer_response_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeerInfo {
    pub node_id: String,
    pub namespace: u16,
    pub role: Role,
    /// Unix ms.
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutingState {
    pub routing_table_size: usize,
    pub routes: Vec<RouteEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageState {
    pub pending_acks: usize,
    pub active_conversations: usize,
    pub broadcast_count: usize,
}

/// Full state dump of one node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemState {
    pub peer_info: PeerInfo,
    pub network_state: SystemHealth,
    pub routing_state: RoutingState,
    pub message_state: MessageState,
}
