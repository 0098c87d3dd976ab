/// Node runtime: drives a `PeerNode` with independent periodic actions.
///
/// There is no central event loop: each action (heartbeat, route
/// announcement, route ingest, liveness check, message poll, delivery poll,
/// maintenance) runs on its own timer in its own task, and every tick is
/// offloaded to the blocking pool so slow storage never delays the other
/// actions. Results reach the application through the node's event bus.
mod r#loop;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::node::PeerNode;

// ── Configuration ─────────────────────────────────────────────────────

/// Configuration for the node runtime.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Interval for publishing our heartbeat.
    pub heartbeat_interval: Duration,
    /// Interval for appending our routing announcement.
    pub announce_interval: Duration,
    /// Interval for merging everyone's announcements.
    pub ingest_interval: Duration,
    /// Interval for liveness transition checks.
    pub liveness_interval: Duration,
    /// Interval for reading new messages.
    pub message_poll_interval: Duration,
    /// Interval for delivery status checks.
    pub delivery_poll_interval: Duration,
    /// Interval for tracker eviction and ack marker pruning.
    pub maintenance_interval: Duration,
    /// Add the node to the registry when the runtime starts.
    pub register_on_start: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(5),
            announce_interval: Duration::from_secs(30),
            ingest_interval: Duration::from_secs(5),
            liveness_interval: Duration::from_secs(2),
            message_poll_interval: Duration::from_secs(1),
            delivery_poll_interval: Duration::from_secs(1),
            maintenance_interval: Duration::from_secs(300),
            register_on_start: true,
        }
    }
}

// ── RuntimeHandle ─────────────────────────────────────────────────────

/// Handle to a running node. Cheap async access to the node plus shutdown.
///
/// Dropping the handle also stops the periodic actions, without waiting.
pub struct RuntimeHandle {
    node: Arc<PeerNode>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RuntimeHandle {
    pub fn node(&self) -> &Arc<PeerNode> {
        &self.node
    }

    /// Run a blocking node operation on the blocking pool.
    async fn blocking<T, F>(&self, op: F) -> Option<T>
    where
        T: Send + 'static,
        F: FnOnce(&PeerNode) -> T + Send + 'static,
    {
        let node = self.node.clone();
        match tokio::task::spawn_blocking(move || op(&*node)).await {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("node operation panicked: {e}");
                None
            }
        }
    }

    /// Send a broadcast. Empty id on failure.
    pub async fn send_broadcast(&self, body: impl Into<String>) -> String {
        let body = body.into();
        self.blocking(move |node| node.send_broadcast(&body))
            .await
            .unwrap_or_default()
    }

    /// Send a private message. Empty id on failure.
    pub async fn send_private(&self, peer: impl Into<String>, body: impl Into<String>) -> String {
        let (peer, body) = (peer.into(), body.into());
        self.blocking(move |node| node.send_private(&peer, &body))
            .await
            .unwrap_or_default()
    }

    /// Everything this node can read, oldest first.
    pub async fn read_all(&self) -> Vec<String> {
        self.blocking(|node| node.read_all()).await.unwrap_or_default()
    }

    pub async fn save_snapshot(&self) -> bool {
        self.blocking(|node| node.save_snapshot())
            .await
            .unwrap_or(false)
    }

    pub async fn export_messages(&self, path: Option<PathBuf>) -> bool {
        self.blocking(move |node| node.export_messages(path.as_deref()))
            .await
            .unwrap_or(false)
    }

    /// Stop every periodic action and wait for them to finish.
    ///
    /// No departure is announced: peers notice through heartbeat timeout.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }
        tracing::info!(node = %self.node.id(), "runtime stopped");
    }
}

// ── NodeRuntime ───────────────────────────────────────────────────────

/// The node runtime. Spawn it and talk to the node through the handle.
pub struct NodeRuntime;

impl NodeRuntime {
    /// Start every periodic action for `node`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(node: Arc<PeerNode>, config: RuntimeConfig) -> RuntimeHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let tasks = r#loop::spawn_actions(node.clone(), &config, shutdown_rx);
        tracing::info!(node = %node.id(), actions = tasks.len(), "runtime started");

        RuntimeHandle {
            node,
            shutdown_tx,
            tasks: Mutex::new(tasks),
        }
    }
}
