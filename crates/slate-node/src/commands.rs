//! One-shot commands: each does a single operation against the shared store
//! and prints its result as JSONL.

use crate::events::{emit, EventDone, EventLine, EventSent};
use serde::Serialize;
use slate_protocol::{channels, PeerNode};
use std::path::Path;
use std::time::Duration;

pub fn send(node: &PeerNode, to: Option<&str>, body: &str) {
    // Sending implies joining
    node.register();
    let message_id = match to {
        Some(peer) => node.send_private(peer, body),
        None => node.send_broadcast(body),
    };
    emit(&EventSent {
        event: "sent",
        ok: !message_id.is_empty(),
        message_id,
        to: to.map(str::to_string),
    });
}

pub fn read(node: &PeerNode, with: Option<&str>, broadcast_only: bool) {
    let lines = match (with, broadcast_only) {
        (Some(peer), _) => node.read_private(peer),
        (None, true) => node.read_broadcast(),
        (None, false) => node.read_all(),
    };
    for line in &lines {
        emit(&EventLine {
            event: "message",
            line,
        });
    }
}

#[derive(Serialize)]
struct EventPeers {
    event: &'static str,
    timeout_s: u64,
    active: Vec<String>,
    registered: Vec<String>,
}

pub fn peers(node: &PeerNode, timeout: Duration) {
    emit(&EventPeers {
        event: "peers",
        timeout_s: timeout.as_secs(),
        active: node.list_active_peers(timeout),
        registered: node.registered_peers(),
    });
}

#[derive(Serialize)]
struct EventStatus {
    event: &'static str,
    peer: String,
    namespace: u16,
    #[serde(flatten)]
    status: slate_protocol::PeerStatus,
}

pub fn status(node: &PeerNode, peer: &str, namespace: u16) {
    emit(&EventStatus {
        event: "status",
        peer: peer.to_string(),
        namespace,
        status: node.peer_status(peer, namespace),
    });
}

/// Merge everyone's announcements, then print the resulting table.
pub fn routes(node: &PeerNode) {
    node.ingest_route_updates();
    for entry in node.routing_table().sorted_entries() {
        #[derive(Serialize)]
        struct EventRoute<'a> {
            event: &'static str,
            #[serde(flatten)]
            entry: &'a slate_protocol::RouteEntry,
        }
        emit(&EventRoute {
            event: "route",
            entry: &entry,
        });
    }
}

#[derive(Serialize)]
struct EventParticipants {
    event: &'static str,
    partners: Vec<String>,
    known_senders: Vec<String>,
}

pub fn participants(node: &PeerNode) {
    emit(&EventParticipants {
        event: "participants",
        partners: node.discover_participants(node.id().id()),
        known_senders: node.known_senders(),
    });
}

pub fn health(node: &PeerNode) {
    node.ingest_route_updates();
    #[derive(Serialize)]
    struct EventHealth {
        event: &'static str,
        #[serde(flatten)]
        state: slate_protocol::SystemState,
    }
    emit(&EventHealth {
        event: "health",
        state: node.system_state(),
    });
}

pub fn export(node: &PeerNode, out: Option<&Path>) {
    let ok = node.export_messages(out);
    let target = match out {
        Some(path) => path.display().to_string(),
        None => channels::export(node.id().namespace(), node.id().id()),
    };
    emit(&EventDone::new("export", ok).with_detail(target));
}

pub fn clear(node: &PeerNode, with: Option<&str>) {
    let ok = match with {
        Some(peer) => node.clear_private(peer),
        None => node.clear_broadcast(),
    };
    emit(&EventDone::new("clear", ok));
}

/// Delete mesh bookkeeping, and with `all` every message log too.
pub fn reset(node: &PeerNode, all: bool) -> anyhow::Result<()> {
    let prefixes: &[&str] = if all {
        &channels::ALL_PREFIXES
    } else {
        &channels::MESH_PREFIXES
    };
    let removed = channels::purge(node.store().as_ref(), prefixes)?;
    emit(&EventDone::new("reset", true).with_detail(format!("{removed} channels removed")));
    Ok(())
}
