//! Persisted node state.
//!
//! A snapshot captures what a node would otherwise rebuild slowly after a
//! restart: its routing table, its outstanding deliveries and its heartbeat
//! cache. Restoring replaces state wholesale, it never merges.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use slate_store::ChannelStore;

use crate::discovery::HeartbeatRecord;
use crate::error::SlateProtocolError;
use crate::messages::MessageExport;
use crate::routing::RoutingTable;
use crate::tracker::PendingDelivery;
use crate::types::Role;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub node_id: String,
    pub namespace: u16,
    pub role: Role,
    /// Unix ms.
    pub saved_at: u64,
    pub routing_table: RoutingTable,
    /// Message id → delivery record.
    pub pending: BTreeMap<String, PendingDelivery>,
    /// Route key → last heartbeat seen.
    pub heartbeats: BTreeMap<String, HeartbeatRecord>,
}

impl StateSnapshot {
    pub fn to_json(&self) -> Result<Vec<u8>, SlateProtocolError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn from_json(data: &[u8]) -> Result<Self, SlateProtocolError> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// Write a snapshot to `channel`.
pub fn save(store: &dyn ChannelStore, channel: &str, snapshot: &StateSnapshot) -> Result<(), SlateProtocolError> {
    store.write_full(channel, &snapshot.to_json()?)?;
    Ok(())
}

/// Read a snapshot from `channel`. `Ok(None)` if there is none.
pub fn load(store: &dyn ChannelStore, channel: &str) -> Result<Option<StateSnapshot>, SlateProtocolError> {
    match store.read_full(channel)? {
        Some(data) => Ok(Some(StateSnapshot::from_json(&data)?)),
        None => Ok(None),
    }
}

/// Write a message export as pretty JSON to a local file.
pub fn write_export_file(export: &MessageExport, path: &Path) -> Result<(), SlateProtocolError> {
    let data = serde_json::to_vec_pretty(export)?;
    std::fs::write(path, data).map_err(|source| SlateProtocolError::Export {
        path: path.display().to_string(),
        source,
    })
}

/// Write a message export as pretty JSON to a store channel.
pub fn write_export_channel(
    store: &dyn ChannelStore,
    channel: &str,
    export: &MessageExport,
) -> Result<(), SlateProtocolError> {
    store.write_full(channel, &serde_json::to_vec_pretty(export)?)?;
    Ok(())
}
