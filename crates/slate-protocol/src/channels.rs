//! Channel naming for every record kind the mesh keeps in the store.
//!
//! Names are flat and `.`-separated so that each maps to one file in a
//! directory store. Node ids never contain `.`, which keeps every name
//! unambiguous to parse.

use slate_store::ChannelStore;

use crate::error::SlateProtocolError;

pub const REGISTRY: &str = "registry";
pub const BROADCAST: &str = "broadcast";

pub const HEARTBEAT_PREFIX: &str = "heartbeat.";
pub const ROUTES_PREFIX: &str = "routes.";
pub const PRIVATE_PREFIX: &str = "private.";
pub const SNAPSHOT_PREFIX: &str = "snapshot.";
pub const ACK_PREFIX: &str = "ack.";
pub const EXPORT_PREFIX: &str = "export.";

/// Membership and liveness channels, cleared when a mesh is reset.
pub const MESH_PREFIXES: [&str; 4] = [HEARTBEAT_PREFIX, ROUTES_PREFIX, REGISTRY, ACK_PREFIX];

/// Everything the mesh writes, conversations and snapshots included.
pub const ALL_PREFIXES: [&str; 8] = [
    HEARTBEAT_PREFIX,
    ROUTES_PREFIX,
    REGISTRY,
    ACK_PREFIX,
    BROADCAST,
    PRIVATE_PREFIX,
    SNAPSHOT_PREFIX,
    EXPORT_PREFIX,
];

pub fn heartbeat(namespace: u16, id: &str) -> String {
    format!("{HEARTBEAT_PREFIX}{namespace}.{id}")
}

pub fn routes(namespace: u16) -> String {
    format!("{ROUTES_PREFIX}{namespace}")
}

/// Private log shared by two peers. Symmetric in its arguments.
pub fn private(a: &str, b: &str) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("{PRIVATE_PREFIX}{lo}.{hi}")
}

/// Recover the `(lo, hi)` pair from a private log name.
pub fn parse_private(channel: &str) -> Option<(&str, &str)> {
    let rest = channel.strip_prefix(PRIVATE_PREFIX)?;
    let (lo, hi) = rest.split_once('.')?;
    if lo.is_empty() || hi.is_empty() || hi.contains('.') {
        return None;
    }
    Some((lo, hi))
}

pub fn snapshot(namespace: u16, id: &str) -> String {
    format!("{SNAPSHOT_PREFIX}{namespace}.{id}")
}

pub fn ack(message_id: &str) -> String {
    format!("{ACK_PREFIX}{message_id}")
}

pub fn export(namespace: u16, id: &str) -> String {
    format!("{EXPORT_PREFIX}{namespace}.{id}")
}

/// Delete every channel starting with one of `prefixes`.
///
/// Returns the number of channels removed. Used to clear stale heartbeats,
/// announcements and registry entries before a mesh restarts.
pub fn purge(store: &dyn ChannelStore, prefixes: &[&str]) -> Result<usize, SlateProtocolError> {
    let mut removed = 0;
    for prefix in prefixes {
        for channel in store.list_channels(prefix)? {
            if store.delete(&channel)? {
                removed += 1;
            }
        }
    }
    tracing::info!(removed, "purged stale channels");
    Ok(removed)
}
