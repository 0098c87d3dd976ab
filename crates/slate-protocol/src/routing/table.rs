use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::NodeId;

/// Best known path to one destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteEntry {
    /// Route key of the destination (`"{id}:{namespace}"`).
    pub destination: String,
    /// Node id of the neighbor to go through.
    pub next_hop: String,
    /// Hop cost. 0 only for the self-route.
    pub metric: u32,
}

/// Destination key → best route.
///
/// Serialized as a plain JSON object so announcements and snapshots stay
/// readable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoutingTable {
    routes: HashMap<String, RouteEntry>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// A table holding only the self-route of `node`.
    pub fn with_self_route(node: &NodeId) -> Self {
        let mut table = Self::new();
        table.seed_self_route(node);
        table
    }

    /// (Re)install the metric-0 route to ourselves.
    pub fn seed_self_route(&mut self, node: &NodeId) {
        let key = node.route_key();
        self.routes.insert(
            key.clone(),
            RouteEntry {
                destination: key,
                next_hop: node.id().to_string(),
                metric: 0,
            },
        );
    }

    pub fn get(&self, destination: &str) -> Option<&RouteEntry> {
        self.routes.get(destination)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// `(destination key, entry)` pairs in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &RouteEntry)> {
        self.routes.iter()
    }

    /// Entries sorted by destination, for display and export.
    pub fn sorted_entries(&self) -> Vec<RouteEntry> {
        let mut entries: Vec<RouteEntry> = self.routes.values().cloned().collect();
        entries.sort_by(|a, b| a.destination.cmp(&b.destination));
        entries
    }

    /// Install `via next_hop at metric` if it beats the current route.
    ///
    /// Returns whether the table changed. Equal metrics keep the existing
    /// route.
    pub fn offer(&mut self, destination: &str, next_hop: &str, metric: u32) -> bool {
        if let Some(existing) = self.routes.get(destination) {
            if existing.metric <= metric {
                return false;
            }
        }
        self.routes.insert(
            destination.to_string(),
            RouteEntry {
                destination: destination.to_string(),
                next_hop: next_hop.to_string(),
                metric,
            },
        );
        true
    }

    /// Overwrite a route unconditionally.
    pub fn insert(&mut self, entry: RouteEntry) {
        self.routes.insert(entry.destination.clone(), entry);
    }
}
