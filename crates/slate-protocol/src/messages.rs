//! Broadcast and private message logs.
//!
//! Messages are stored as human-readable display lines, one per line, in
//! the `broadcast` log or in the private log shared by two peers:
//!
//! ```text
//! [2026-03-01 14:02:11] alice: hello everyone (id:1a2b3c4d)
//! [2026-03-01 14:02:15] bob -> alice: hi! (id:5e6f7a8b)
//! ```
//!
//! Timestamps are UTC with whole seconds. Appends go through bounded
//! optimistic retry; concurrent appenders can still lose a line.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use slate_store::{with_line_appended, ChannelStore};

use crate::channels;
use crate::error::SlateProtocolError;
use crate::retry::{self, RetryPolicy};
use crate::types::validate_peer_id;

/// Length of a message id (hex chars).
pub const MESSAGE_ID_LEN: usize = 8;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A parsed display line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub timestamp: NaiveDateTime,
    pub sender: String,
    /// `None` for broadcasts.
    pub recipient: Option<String>,
    pub body: String,
    pub message_id: String,
}

impl Message {
    /// Build a message with a fresh id. Newlines in `body` become spaces.
    pub fn new(
        sender: &str,
        recipient: Option<&str>,
        body: &str,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            timestamp: timestamp.naive_utc(),
            sender: sender.to_string(),
            recipient: recipient.map(str::to_string),
            body: flatten(body),
            message_id: new_message_id(),
        }
    }

    pub fn to_line(&self) -> String {
        let ts = self.timestamp.format(TIMESTAMP_FORMAT);
        match &self.recipient {
            Some(to) => format!(
                "[{ts}] {} -> {to}: {} (id:{})",
                self.sender, self.body, self.message_id
            ),
            None => format!("[{ts}] {}: {} (id:{})", self.sender, self.body, self.message_id),
        }
    }

    /// Parse a display line. `None` if it does not follow the format.
    pub fn parse_line(line: &str) -> Option<Self> {
        let timestamp = line_timestamp(line)?;
        let rest = line.split_once("] ")?.1;

        let (head, message_id) = rest.strip_suffix(')')?.rsplit_once(" (id:")?;
        if message_id.is_empty() || message_id.contains(char::is_whitespace) {
            return None;
        }

        let (who, body) = head.split_once(": ")?;
        let (sender, recipient) = match who.split_once(" -> ") {
            Some((from, to)) => (from, Some(to.to_string())),
            None => (who, None),
        };
        if validate_peer_id(sender).is_err() {
            return None;
        }
        Some(Self {
            timestamp,
            sender: sender.to_string(),
            recipient,
            body: body.to_string(),
            message_id: message_id.to_string(),
        })
    }
}

/// First 8 hex chars of a fresh uuid v4.
pub fn new_message_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(MESSAGE_ID_LEN);
    id
}

/// Timestamp embedded in a display line.
pub fn line_timestamp(line: &str) -> Option<NaiveDateTime> {
    let inner = line.strip_prefix('[')?;
    let (ts, _) = inner.split_once(']')?;
    NaiveDateTime::parse_from_str(ts, TIMESTAMP_FORMAT).ok()
}

fn flatten(body: &str) -> String {
    body.replace("\r\n", " ").replace(['\n', '\r'], " ")
}

/// JSON export of everything a viewer can read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageExport {
    pub export_time: String,
    pub node_id: String,
    pub namespace: u16,
    pub broadcast_messages: Vec<String>,
    /// Partner id → lines of the shared private log.
    pub private_conversations: BTreeMap<String, Vec<String>>,
    pub message_summary: MessageSummary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MessageSummary {
    pub total_broadcast: usize,
    pub total_partners: usize,
}

/// Reads and appends message logs on behalf of one node.
pub struct MessageStore {
    store: Arc<dyn ChannelStore>,
    local_id: String,
    retry: RetryPolicy,
}

impl MessageStore {
    pub fn new(store: Arc<dyn ChannelStore>, local_id: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            store,
            local_id: local_id.into(),
            retry,
        }
    }

    // ── Send ─────────────────────────────────────────────────────────────

    /// Append a broadcast line. Returns the message id.
    pub fn send_broadcast(&self, body: &str) -> Result<String, SlateProtocolError> {
        self.send_broadcast_at(body, Utc::now())
    }

    pub fn send_broadcast_at(&self, body: &str, at: DateTime<Utc>) -> Result<String, SlateProtocolError> {
        let message = Message::new(&self.local_id, None, body, at);
        self.append(channels::BROADCAST, &message)?;
        Ok(message.message_id)
    }

    /// Append a line to the private log shared with `recipient`.
    pub fn send_private(&self, recipient: &str, body: &str) -> Result<String, SlateProtocolError> {
        self.send_private_at(recipient, body, Utc::now())
    }

    pub fn send_private_at(
        &self,
        recipient: &str,
        body: &str,
        at: DateTime<Utc>,
    ) -> Result<String, SlateProtocolError> {
        validate_peer_id(recipient)?;
        let message = Message::new(&self.local_id, Some(recipient), body, at);
        self.append(&channels::private(&self.local_id, recipient), &message)?;
        Ok(message.message_id)
    }

    fn append(&self, channel: &str, message: &Message) -> Result<(), SlateProtocolError> {
        let line = message.to_line();
        retry::update_channel(
            self.store.as_ref(),
            channel,
            self.retry,
            |current| with_line_appended(current, &line),
            |data| retry::contains_line(data, &line),
        )?;
        tracing::debug!(channel, message_id = %message.message_id, "message appended");
        Ok(())
    }

    // ── Read ─────────────────────────────────────────────────────────────

    /// Every broadcast line. Missing or unreadable log → empty.
    pub fn read_broadcast(&self) -> Vec<String> {
        self.read_lines(channels::BROADCAST)
    }

    /// Every line of the private log between `a` and `b`, in either order.
    pub fn read_private(&self, a: &str, b: &str) -> Vec<String> {
        if validate_peer_id(a).is_err() || validate_peer_id(b).is_err() {
            return Vec::new();
        }
        self.read_lines(&channels::private(a, b))
    }

    /// Broadcast plus every private log naming `viewer`, sorted by embedded
    /// timestamp. Lines without a readable timestamp sort first; ties keep
    /// log order.
    pub fn read_all_for(&self, viewer: &str) -> Vec<String> {
        let mut lines = self.read_broadcast();
        for (channel, _) in self.private_logs_of(viewer) {
            lines.extend(self.read_lines(&channel));
        }
        lines.sort_by_key(|line| line_timestamp(line));
        lines
    }

    /// Everyone `viewer` shares a private log with, sorted.
    pub fn discover_participants(&self, viewer: &str) -> Vec<String> {
        let partners: BTreeSet<String> = self
            .private_logs_of(viewer)
            .into_iter()
            .map(|(_, partner)| partner)
            .collect();
        partners.into_iter().collect()
    }

    /// Every id seen as a broadcast sender or in a private log name.
    pub fn known_senders(&self) -> Vec<String> {
        let mut ids: BTreeSet<String> = self
            .read_broadcast()
            .iter()
            .filter_map(|line| Message::parse_line(line))
            .map(|m| m.sender)
            .collect();
        for channel in self.private_channels() {
            if let Some((lo, hi)) = channels::parse_private(&channel) {
                ids.insert(lo.to_string());
                ids.insert(hi.to_string());
            }
        }
        ids.into_iter().collect()
    }

    // ── Clear / export ───────────────────────────────────────────────────

    /// Delete the broadcast log. Returns whether it existed.
    pub fn clear_broadcast(&self) -> Result<bool, SlateProtocolError> {
        Ok(self.store.delete(channels::BROADCAST)?)
    }

    /// Delete the private log between `a` and `b`.
    pub fn clear_private(&self, a: &str, b: &str) -> Result<bool, SlateProtocolError> {
        validate_peer_id(a)?;
        validate_peer_id(b)?;
        Ok(self.store.delete(&channels::private(a, b))?)
    }

    /// Everything `viewer` can read, ready to serialize.
    pub fn export(&self, viewer: &str, namespace: u16) -> MessageExport {
        let broadcast_messages = self.read_broadcast();
        let private_conversations: BTreeMap<String, Vec<String>> = self
            .private_logs_of(viewer)
            .into_iter()
            .map(|(channel, partner)| (partner, self.read_lines(&channel)))
            .collect();
        let message_summary = MessageSummary {
            total_broadcast: broadcast_messages.len(),
            total_partners: private_conversations.len(),
        };
        MessageExport {
            export_time: Utc::now().to_rfc3339(),
            node_id: viewer.to_string(),
            namespace,
            broadcast_messages,
            private_conversations,
            message_summary,
        }
    }

    // ── Internal ─────────────────────────────────────────────────────────

    fn read_lines(&self, channel: &str) -> Vec<String> {
        let data = match self.store.read_full(channel) {
            Ok(Some(data)) => data,
            Ok(None) => return Vec::new(),
            Err(e) => {
                tracing::debug!(channel, "message log unreadable: {e}");
                return Vec::new();
            }
        };
        let Ok(text) = std::str::from_utf8(&data) else {
            tracing::warn!(channel, "message log is not valid UTF-8, ignoring");
            return Vec::new();
        };
        text.lines()
            .filter(|l| !l.trim().is_empty())
            .map(str::to_string)
            .collect()
    }

    fn private_channels(&self) -> BTreeSet<String> {
        self.store
            .list_channels(channels::PRIVATE_PREFIX)
            .unwrap_or_else(|e| {
                tracing::debug!("private logs unlistable: {e}");
                BTreeSet::new()
            })
    }

    /// `(channel, partner)` for every private log naming `viewer`.
    fn private_logs_of(&self, viewer: &str) -> Vec<(String, String)> {
        self.private_channels()
            .into_iter()
            .filter_map(|channel| {
                let (lo, hi) = channels::parse_private(&channel)?;
                let partner = if lo == viewer {
                    hi
                } else if hi == viewer {
                    lo
                } else {
                    return None;
                };
                let partner = partner.to_string();
                Some((channel, partner))
            })
            .collect()
    }
}
