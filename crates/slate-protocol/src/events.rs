//! In-process event fan-out.
//!
//! Any number of subscribers each get their own bounded queue. Publishing
//! never blocks: a subscriber whose queue is full misses the event, and a
//! subscriber whose receiver was dropped is removed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::discovery::DiscoveryEvent;
use crate::tracker::{DeliveryStatus, StatusChange};
use crate::types::Role;

/// Default per-subscriber queue depth.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

pub type SubscriptionId = u64;

/// Receiving end of a bus subscription.
pub struct Subscription<E> {
    id: SubscriptionId,
    rx: mpsc::Receiver<E>,
}

impl<E> Subscription<E> {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Wait for the next event. `None` once unsubscribed and drained.
    pub async fn recv(&mut self) -> Option<E> {
        self.rx.recv().await
    }

    /// Next queued event, if any.
    pub fn try_recv(&mut self) -> Option<E> {
        self.rx.try_recv().ok()
    }
}

/// Publish/subscribe hub for one event type.
pub struct EventBus<E> {
    next_id: AtomicU64,
    capacity: usize,
    subscribers: Mutex<HashMap<SubscriptionId, mpsc::Sender<E>>>,
}

impl<E: Clone + Send> EventBus<E> {
    pub fn new(capacity: usize) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            capacity: capacity.max(1),
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    pub fn subscribe(&self) -> Subscription<E> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.capacity);
        self.subscribers.lock().insert(id, tx);
        Subscription { id, rx }
    }

    /// Returns whether the subscription existed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers.lock().remove(&id).is_some()
    }

    /// Offer `event` to every subscriber. Returns how many accepted it.
    ///
    /// Must not log: the log layer publishes through this same bus.
    pub fn publish(&self, event: E) -> usize {
        let mut subscribers = self.subscribers.lock();
        let mut delivered = 0;
        let mut closed = Vec::new();
        for (id, tx) in subscribers.iter() {
            match tx.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {}
                Err(TrySendError::Closed(_)) => closed.push(*id),
            }
        }
        for id in closed {
            subscribers.remove(&id);
        }
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

impl<E: Clone + Send> Default for EventBus<E> {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

/// Everything a running node reports to the application.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MeshEvent {
    PeerDiscovered {
        node_id: String,
        namespace: u16,
        role: Role,
    },
    PeerOffline {
        node_id: String,
        namespace: u16,
    },
    PeerOnline {
        node_id: String,
        namespace: u16,
    },
    RoutesChanged {
        table_size: usize,
    },
    MessageReceived {
        message_id: String,
        sender: String,
        line: String,
    },
    DeliveryChanged {
        message_id: String,
        previous: DeliveryStatus,
        current: DeliveryStatus,
    },
    Error {
        description: String,
    },
}

impl From<DiscoveryEvent> for MeshEvent {
    fn from(event: DiscoveryEvent) -> Self {
        match event {
            DiscoveryEvent::PeerDiscovered {
                node_id,
                namespace,
                role,
            } => MeshEvent::PeerDiscovered {
                node_id,
                namespace,
                role,
            },
            DiscoveryEvent::PeerOffline { node_id, namespace } => {
                MeshEvent::PeerOffline { node_id, namespace }
            }
            DiscoveryEvent::PeerOnline { node_id, namespace } => {
                MeshEvent::PeerOnline { node_id, namespace }
            }
        }
    }
}

impl From<StatusChange> for MeshEvent {
    fn from(change: StatusChange) -> Self {
        MeshEvent::DeliveryChanged {
            message_id: change.message_id,
            previous: change.previous,
            current: change.current,
        }
    }
}
