use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use slate_store::{with_line_appended, ChannelStore};

use crate::channels;
use crate::error::SlateProtocolError;
use crate::retry::{self, RetryPolicy};
use crate::routing::table::{RouteEntry, RoutingTable};
use crate::types::{now_ms, route_key, route_key_id, NodeId};

/// Announcement interval (30 seconds).
pub const ANNOUNCE_INTERVAL_MS: u64 = 30_000;

/// Announcements older than this are pruned on every append (1 hour).
pub const ANNOUNCEMENT_RETENTION_MS: u64 = 60 * 60 * 1000;

/// Cost of one hop to a direct neighbor.
pub const LINK_COST: u32 = 1;

/// Extra penalty added to every route learned through a neighbor.
pub const RELAY_PENALTY: u32 = 1;

/// One line of an announcement log: a node's full table at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingAnnouncement {
    pub sender: String,
    pub namespace: u16,
    /// Unix ms.
    pub timestamp: u64,
    pub routing_table: RoutingTable,
    pub id: String,
}

/// Distance-vector routing over announcement logs.
///
/// Each node appends its table to `routes.{namespace}` and merges every
/// other node's announcements into its own table. Routes only ever improve:
/// there is no split horizon, no poison reverse and no withdrawal, so a
/// vanished node keeps its last metric until a snapshot restore or restart.
pub struct RoutingEngine {
    store: Arc<dyn ChannelStore>,
    local: NodeId,
    retention_ms: u64,
    retry: RetryPolicy,
    table: Mutex<RoutingTable>,
}

impl RoutingEngine {
    pub fn new(store: Arc<dyn ChannelStore>, local: NodeId, retry: RetryPolicy) -> Self {
        Self::with_retention(store, local, retry, ANNOUNCEMENT_RETENTION_MS)
    }

    pub fn with_retention(
        store: Arc<dyn ChannelStore>,
        local: NodeId,
        retry: RetryPolicy,
        retention_ms: u64,
    ) -> Self {
        let table = RoutingTable::with_self_route(&local);
        Self {
            store,
            local,
            retention_ms,
            retry,
            table: Mutex::new(table),
        }
    }

    // ── Announce ─────────────────────────────────────────────────────────

    /// Append our current table to our announcement log.
    pub fn broadcast_update(&self) -> Result<RoutingAnnouncement, SlateProtocolError> {
        self.broadcast_update_at(now_ms())
    }

    /// Announce with a specific timestamp (for testing).
    ///
    /// Lines older than the retention window, and malformed lines, are
    /// dropped in the same write.
    pub fn broadcast_update_at(&self, now: u64) -> Result<RoutingAnnouncement, SlateProtocolError> {
        let announcement = RoutingAnnouncement {
            sender: self.local.id().to_string(),
            namespace: self.local.namespace(),
            timestamp: now,
            routing_table: self.table.lock().clone(),
            id: uuid::Uuid::new_v4().to_string(),
        };
        let line = serde_json::to_string(&announcement)?;
        let channel = channels::routes(self.local.namespace());
        let retention_ms = self.retention_ms;

        retry::update_channel(
            self.store.as_ref(),
            &channel,
            self.retry,
            |current| {
                let kept = current
                    .map(|data| retain_recent(data, now, retention_ms))
                    .unwrap_or_default();
                with_line_appended(Some(kept.as_bytes()), &line)
            },
            |data| retry::contains_line(data, &line),
        )?;

        tracing::debug!(
            node = %self.local,
            routes = announcement.routing_table.len(),
            "routing announcement published"
        );
        Ok(announcement)
    }

    // ── Ingest ───────────────────────────────────────────────────────────

    /// Merge every announcement in every log into our table.
    ///
    /// Returns whether any route changed. Unreadable logs and malformed
    /// lines are skipped individually.
    pub fn ingest_updates(&self) -> Result<bool, SlateProtocolError> {
        let announcements = read_announcements(self.store.as_ref())?;

        let mut changed = false;
        let mut table = self.table.lock();
        for announcement in &announcements {
            changed |= apply_announcement(&mut table, self.local.id(), announcement);
        }
        let size = table.len();
        drop(table);

        if changed {
            tracing::info!(node = %self.local, routes = size, "routing table updated");
        }
        Ok(changed)
    }

    // ── Table access ─────────────────────────────────────────────────────

    pub fn get_route(&self, destination: &str) -> Option<RouteEntry> {
        self.table.lock().get(destination).cloned()
    }

    /// Set the metric of a route, keeping its next hop.
    ///
    /// An unknown destination becomes a direct route through itself.
    pub fn set_metric(&self, destination: &str, metric: u32) -> RouteEntry {
        let mut table = self.table.lock();
        let next_hop = table
            .get(destination)
            .map(|e| e.next_hop.clone())
            .unwrap_or_else(|| route_key_id(destination).to_string());
        let entry = RouteEntry {
            destination: destination.to_string(),
            next_hop,
            metric,
        };
        table.insert(entry.clone());
        entry
    }

    pub fn table(&self) -> RoutingTable {
        self.table.lock().clone()
    }

    /// Replace the table wholesale (snapshot restore).
    ///
    /// The self-route is re-seeded if the restored table lacks it.
    pub fn replace_table(&self, mut table: RoutingTable) {
        let self_key = self.local.route_key();
        if table.get(&self_key).map_or(true, |e| e.metric != 0) {
            table.seed_self_route(&self.local);
        }
        *self.table.lock() = table;
    }

    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.lock().is_empty()
    }

    /// Newest announcement of every sender, sorted by sender.
    pub fn latest_announcements(&self) -> Result<Vec<RoutingAnnouncement>, SlateProtocolError> {
        let mut latest: BTreeMap<String, RoutingAnnouncement> = BTreeMap::new();
        for announcement in read_announcements(self.store.as_ref())? {
            let key = route_key(&announcement.sender, announcement.namespace);
            match latest.get(&key) {
                Some(existing) if existing.timestamp >= announcement.timestamp => {}
                _ => {
                    latest.insert(key, announcement);
                }
            }
        }
        Ok(latest.into_values().collect())
    }
}

// ── Internal ─────────────────────────────────────────────────────────────

/// Distance-vector merge of one announcement. Returns whether `table` changed.
///
/// The sender becomes a neighbor at cost 1; every destination it
/// advertises at cost C is offered at `1 + C + 1`.
pub fn apply_announcement(
    table: &mut RoutingTable,
    local_id: &str,
    announcement: &RoutingAnnouncement,
) -> bool {
    if announcement.sender == local_id {
        return false;
    }
    let sender = announcement.sender.as_str();
    let neighbor = route_key(sender, announcement.namespace);
    let mut changed = table.offer(&neighbor, sender, LINK_COST);

    for (destination, entry) in announcement.routing_table.iter() {
        let candidate = LINK_COST
            .saturating_add(entry.metric)
            .saturating_add(RELAY_PENALTY);
        changed |= table.offer(destination, sender, candidate);
    }
    changed
}

/// Every well-formed announcement in every log.
fn read_announcements(store: &dyn ChannelStore) -> Result<Vec<RoutingAnnouncement>, SlateProtocolError> {
    let mut announcements = Vec::new();
    for channel in store.list_channels(channels::ROUTES_PREFIX)? {
        let data = match store.read_full(&channel) {
            Ok(Some(data)) => data,
            Ok(None) => continue,
            Err(e) => {
                tracing::debug!(channel, "skipping unreadable announcement log: {e}");
                continue;
            }
        };
        for line in String::from_utf8_lossy(&data).lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<RoutingAnnouncement>(line) {
                Ok(announcement) => announcements.push(announcement),
                Err(e) => tracing::debug!(channel, "skipping malformed announcement: {e}"),
            }
        }
    }
    Ok(announcements)
}

/// Keep only well-formed lines younger than `retention_ms`.
fn retain_recent(data: &[u8], now: u64, retention_ms: u64) -> String {
    let mut kept = String::new();
    for line in String::from_utf8_lossy(data).lines() {
        let Ok(announcement) = serde_json::from_str::<RoutingAnnouncement>(line) else {
            continue;
        };
        if now.saturating_sub(announcement.timestamp) < retention_ms {
            kept.push_str(line);
            kept.push('\n');
        }
    }
    kept
}
