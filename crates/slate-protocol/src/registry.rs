//! Peer registry: the shared list of every node that ever joined.
//!
//! The `registry` channel holds sorted, newline-separated ids. Adding an id
//! is a read-merge-write under bounded optimistic retry; there is no
//! removal.

use std::cell::Cell;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use slate_store::ChannelStore;

use crate::channels;
use crate::discovery::HeartbeatMonitor;
use crate::error::SlateProtocolError;
use crate::retry::{self, RetryPolicy};
use crate::types::{now_ms, validate_peer_id};

pub struct PeerRegistry {
    store: Arc<dyn ChannelStore>,
    local_id: String,
    retry: RetryPolicy,
}

impl PeerRegistry {
    pub fn new(store: Arc<dyn ChannelStore>, local_id: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            store,
            local_id: local_id.into(),
            retry,
        }
    }

    /// Add our id to the registry. Idempotent.
    ///
    /// Returns `true` if the id was not registered before.
    pub fn register(&self) -> Result<bool, SlateProtocolError> {
        let newly_added = Cell::new(false);
        retry::update_channel(
            self.store.as_ref(),
            channels::REGISTRY,
            self.retry,
            |current| {
                let mut ids = current.map(parse_registry).unwrap_or_default();
                newly_added.set(ids.insert(self.local_id.clone()));
                render(&ids)
            },
            |data| parse_registry(data).contains(&self.local_id),
        )?;

        if newly_added.get() {
            tracing::info!(id = %self.local_id, "registered");
        }
        Ok(newly_added.get())
    }

    /// Every registered id, sorted. Malformed entries are skipped.
    pub fn registered(&self) -> Result<Vec<String>, SlateProtocolError> {
        Ok(self
            .store
            .read_full(channels::REGISTRY)?
            .map(|data| parse_registry(&data))
            .unwrap_or_default()
            .into_iter()
            .collect())
    }

    /// Registered ids with a heartbeat younger than `timeout_ms`, freshest
    /// first.
    pub fn list_active(
        &self,
        monitor: &HeartbeatMonitor,
        timeout_ms: u64,
    ) -> Result<Vec<String>, SlateProtocolError> {
        self.list_active_at(monitor, timeout_ms, now_ms())
    }

    pub fn list_active_at(
        &self,
        monitor: &HeartbeatMonitor,
        timeout_ms: u64,
        now: u64,
    ) -> Result<Vec<String>, SlateProtocolError> {
        let registered: HashSet<String> = self.registered()?.into_iter().collect();
        let mut seen = HashSet::new();
        Ok(monitor
            .active_peers_at(timeout_ms, now)?
            .into_iter()
            .map(|peer| peer.node_id)
            .filter(|id| registered.contains(id) && seen.insert(id.clone()))
            .collect())
    }
}

fn parse_registry(data: &[u8]) -> BTreeSet<String> {
    String::from_utf8_lossy(data)
        .lines()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .filter(|id| {
            let ok = validate_peer_id(id).is_ok();
            if !ok {
                tracing::debug!(entry = %id, "skipping malformed registry entry");
            }
            ok
        })
        .map(str::to_string)
        .collect()
}

fn render(ids: &BTreeSet<String>) -> Vec<u8> {
    let mut out = String::new();
    for id in ids {
        out.push_str(id);
        out.push('\n');
    }
    out.into_bytes()
}
