/// Delivery tracker for Slate messages.
///
/// Sender side: every sent message gets a `PendingDelivery` record.
/// Receiver side: acknowledging a message writes an `ack.{message_id}`
/// marker to the store. The sender resolves status on demand:
/// marker seen → Acknowledged (sticky), older than the timeout → Expired,
/// otherwise Pending.
///
/// `poll_changes` reports each status transition once, so the runtime can
/// turn them into events.
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use slate_store::ChannelStore;

use crate::channels;
use crate::error::SlateProtocolError;
use crate::types::now_ms;

/// Unacknowledged messages expire after 30 seconds.
pub const DELIVERY_TIMEOUT_MS: u64 = 30_000;

/// Ack markers are pruned after an hour.
pub const ACK_MARKER_MAX_AGE_MS: u64 = 60 * 60 * 1000;

/// Maximum number of tracked messages (DoS protection).
const MAX_TRACKED: usize = 10_000;

/// Tracked messages are evicted after 24h.
pub const MAX_AGE_MS: u64 = 24 * 60 * 60 * 1000;

/// Sender-side record of one outgoing message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingDelivery {
    pub message_id: String,
    /// Unix ms.
    pub sent_at: u64,
    /// Only ever flips false → true.
    pub acknowledged: bool,
}

/// Content of an `ack.{message_id}` channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckMarker {
    pub message_id: String,
    pub ack_from: String,
    pub timestamp: u64,
}

/// Resolved delivery status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Acknowledged,
    Expired,
    /// Not tracked by this node.
    Unknown,
}

/// Status plus timing, as returned by `status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub message_id: String,
    pub status: DeliveryStatus,
    pub sent_at: Option<u64>,
    pub age_ms: Option<u64>,
}

/// A status transition event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusChange {
    pub message_id: String,
    pub previous: DeliveryStatus,
    pub current: DeliveryStatus,
}

/// Per-status totals for health reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryCounts {
    pub pending: usize,
    pub acknowledged: usize,
    pub expired: usize,
}

#[derive(Default)]
struct TrackerState {
    records: HashMap<String, PendingDelivery>,
    /// Last status returned by `poll_changes`.
    reported: HashMap<String, DeliveryStatus>,
}

/// Tracks outgoing messages until they are acknowledged or expire.
pub struct DeliveryTracker {
    store: Arc<dyn ChannelStore>,
    local_id: String,
    timeout_ms: u64,
    state: Mutex<TrackerState>,
}

impl DeliveryTracker {
    pub fn new(store: Arc<dyn ChannelStore>, local_id: impl Into<String>) -> Self {
        Self::with_timeout(store, local_id, DELIVERY_TIMEOUT_MS)
    }

    pub fn with_timeout(
        store: Arc<dyn ChannelStore>,
        local_id: impl Into<String>,
        timeout_ms: u64,
    ) -> Self {
        Self {
            store,
            local_id: local_id.into(),
            timeout_ms,
            state: Mutex::new(TrackerState::default()),
        }
    }

    /// Start tracking an outgoing message.
    ///
    /// Returns `false` if the id is already tracked (the existing record is
    /// kept). A full tracker first drops day-old records, then the oldest
    /// one, so a new send is always tracked.
    pub fn track(&self, message_id: &str) -> bool {
        self.track_at(message_id, now_ms())
    }

    /// Track with a specific send time (for testing).
    pub fn track_at(&self, message_id: &str, now: u64) -> bool {
        let mut state = self.state.lock();
        if state.records.contains_key(message_id) {
            return false;
        }
        if state.records.len() >= MAX_TRACKED {
            evict(&mut state, MAX_AGE_MS, now);
            while state.records.len() >= MAX_TRACKED {
                let Some(oldest) = oldest_record(&state) else {
                    break;
                };
                tracing::warn!(evicted = %oldest, "delivery tracker full, dropping oldest record");
                state.records.remove(&oldest);
                state.reported.remove(&oldest);
            }
        }
        state.records.insert(
            message_id.to_string(),
            PendingDelivery {
                message_id: message_id.to_string(),
                sent_at: now,
                acknowledged: false,
            },
        );
        true
    }

    /// Receiver side: publish an acknowledgment marker. Idempotent.
    pub fn acknowledge(&self, message_id: &str) -> Result<(), SlateProtocolError> {
        self.acknowledge_at(message_id, now_ms())
    }

    pub fn acknowledge_at(&self, message_id: &str, now: u64) -> Result<(), SlateProtocolError> {
        let marker = AckMarker {
            message_id: message_id.to_string(),
            ack_from: self.local_id.clone(),
            timestamp: now,
        };
        let data = serde_json::to_vec(&marker)?;
        self.store.write_full(&channels::ack(message_id), &data)?;
        tracing::debug!(message_id, "acknowledged");
        Ok(())
    }

    /// Resolve the status of a tracked message.
    pub fn status(&self, message_id: &str) -> DeliveryReport {
        self.status_at(message_id, now_ms())
    }

    /// Status at a specific time (for testing).
    pub fn status_at(&self, message_id: &str, now: u64) -> DeliveryReport {
        let record = self.state.lock().records.get(message_id).cloned();
        let Some(record) = record else {
            return DeliveryReport {
                message_id: message_id.to_string(),
                status: DeliveryStatus::Unknown,
                sent_at: None,
                age_ms: None,
            };
        };

        // Store I/O happens outside the lock
        let acknowledged = record.acknowledged || self.marker_present(message_id);
        if acknowledged && !record.acknowledged {
            if let Some(r) = self.state.lock().records.get_mut(message_id) {
                r.acknowledged = true;
            }
        }

        let age = now.saturating_sub(record.sent_at);
        let status = if acknowledged {
            DeliveryStatus::Acknowledged
        } else if age >= self.timeout_ms {
            DeliveryStatus::Expired
        } else {
            DeliveryStatus::Pending
        };
        DeliveryReport {
            message_id: message_id.to_string(),
            status,
            sent_at: Some(record.sent_at),
            age_ms: Some(age),
        }
    }

    /// Status transitions since the last poll.
    pub fn poll_changes(&self) -> Vec<StatusChange> {
        self.poll_changes_at(now_ms())
    }

    pub fn poll_changes_at(&self, now: u64) -> Vec<StatusChange> {
        let ids: Vec<String> = {
            let state = self.state.lock();
            state
                .records
                .keys()
                .filter(|id| state.reported.get(*id) != Some(&DeliveryStatus::Acknowledged))
                .cloned()
                .collect()
        };

        let mut changes = Vec::new();
        for id in ids {
            let current = self.status_at(&id, now).status;
            if current == DeliveryStatus::Unknown {
                // Evicted meanwhile
                continue;
            }
            let mut state = self.state.lock();
            let previous = state
                .reported
                .insert(id.clone(), current)
                .unwrap_or(DeliveryStatus::Pending);
            if previous != current {
                changes.push(StatusChange {
                    message_id: id,
                    previous,
                    current,
                });
            }
        }
        changes.sort_by(|a, b| a.message_id.cmp(&b.message_id));
        changes
    }

    /// Delete ack markers of tracked messages sent more than `max_age_ms` ago.
    ///
    /// Returns the number of markers removed.
    pub fn prune_ack_markers_at(&self, max_age_ms: u64, now: u64) -> Result<usize, SlateProtocolError> {
        let old: Vec<String> = self
            .state
            .lock()
            .records
            .values()
            .filter(|r| now.saturating_sub(r.sent_at) >= max_age_ms)
            .map(|r| r.message_id.clone())
            .collect();

        let mut removed = 0;
        for id in old {
            if self.store.delete(&channels::ack(&id))? {
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::debug!(removed, "pruned old ack markers");
        }
        Ok(removed)
    }

    pub fn prune_ack_markers(&self, max_age_ms: u64) -> Result<usize, SlateProtocolError> {
        self.prune_ack_markers_at(max_age_ms, now_ms())
    }

    /// Drop records older than `max_age_ms`. Returns how many were dropped.
    pub fn evict_older_than_at(&self, max_age_ms: u64, now: u64) -> usize {
        evict(&mut self.state.lock(), max_age_ms, now)
    }

    pub fn evict_older_than(&self, max_age_ms: u64) -> usize {
        self.evict_older_than_at(max_age_ms, now_ms())
    }

    /// Totals by status, resolved at `now`.
    pub fn counts_at(&self, now: u64) -> DeliveryCounts {
        let ids: Vec<String> = self.state.lock().records.keys().cloned().collect();
        let mut counts = DeliveryCounts::default();
        for id in ids {
            match self.status_at(&id, now).status {
                DeliveryStatus::Pending => counts.pending += 1,
                DeliveryStatus::Acknowledged => counts.acknowledged += 1,
                DeliveryStatus::Expired => counts.expired += 1,
                DeliveryStatus::Unknown => {}
            }
        }
        counts
    }

    /// Copy of every record, keyed by message id.
    pub fn records(&self) -> BTreeMap<String, PendingDelivery> {
        self.state
            .lock()
            .records
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Replace all records (snapshot restore). Reported state is forgotten.
    pub fn replace_records(&self, records: BTreeMap<String, PendingDelivery>) {
        let mut state = self.state.lock();
        state.records = records.into_iter().collect();
        state.reported.clear();
    }

    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().records.is_empty()
    }

    // ── Internal ───────────────────────────────────────────────────────

    fn marker_present(&self, message_id: &str) -> bool {
        match self.store.read_full(&channels::ack(message_id)) {
            Ok(found) => found.is_some(),
            Err(e) => {
                tracing::debug!(message_id, "ack marker unreadable: {e}");
                false
            }
        }
    }
}

fn evict(state: &mut TrackerState, max_age_ms: u64, now: u64) -> usize {
    let before = state.records.len();
    state
        .records
        .retain(|_, r| now.saturating_sub(r.sent_at) < max_age_ms);
    let records = &state.records;
    state.reported.retain(|id, _| records.contains_key(id));
    before - state.records.len()
}

fn oldest_record(state: &TrackerState) -> Option<String> {
    state
        .records
        .values()
        .min_by(|a, b| a.sent_at.cmp(&b.sent_at).then_with(|| a.message_id.cmp(&b.message_id)))
        .map(|r| r.message_id.clone())
}
