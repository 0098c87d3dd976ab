/// The periodic actions of a running node.
///
/// One task per action. Each task ticks its own interval and runs the
/// action on the blocking pool; a slow tick delays only the next tick of
/// the same action.
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::node::PeerNode;

use super::RuntimeConfig;

pub(super) fn spawn_actions(
    node: Arc<PeerNode>,
    config: &RuntimeConfig,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    // Messages already reported, shared across ticks of the poll action.
    // Never pruned: it holds one id per message ever read, so it grows with
    // the logs and keeps ids of cleared logs until the runtime stops.
    let seen: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));
    let register_pending = Arc::new(Mutex::new(config.register_on_start));

    vec![
        spawn_periodic(
            "heartbeat",
            config.heartbeat_interval,
            node.clone(),
            shutdown.clone(),
            move |node| {
                // Registration is retried on every heartbeat until it sticks
                let mut pending = register_pending.lock();
                if *pending && node.register() {
                    *pending = false;
                }
                drop(pending);
                node.publish_heartbeat();
            },
        ),
        spawn_periodic(
            "announce",
            config.announce_interval,
            node.clone(),
            shutdown.clone(),
            |node| {
                node.broadcast_route_update();
            },
        ),
        spawn_periodic(
            "ingest",
            config.ingest_interval,
            node.clone(),
            shutdown.clone(),
            |node| {
                node.ingest_route_updates();
            },
        ),
        spawn_periodic(
            "liveness",
            config.liveness_interval,
            node.clone(),
            shutdown.clone(),
            |node| {
                node.check_liveness();
            },
        ),
        spawn_periodic(
            "messages",
            config.message_poll_interval,
            node.clone(),
            shutdown.clone(),
            move |node| {
                node.poll_messages(&mut seen.lock());
            },
        ),
        spawn_periodic(
            "deliveries",
            config.delivery_poll_interval,
            node.clone(),
            shutdown.clone(),
            |node| {
                node.poll_deliveries();
            },
        ),
        spawn_periodic(
            "maintenance",
            config.maintenance_interval,
            node,
            shutdown,
            |node| node.maintenance(),
        ),
    ]
}

/// Run `action` every `period` until shutdown is signalled.
///
/// The first tick fires immediately. A zero period is treated as 1 ms.
fn spawn_periodic<F>(
    name: &'static str,
    period: Duration,
    node: Arc<PeerNode>,
    mut shutdown: watch::Receiver<bool>,
    action: F,
) -> JoinHandle<()>
where
    F: Fn(&PeerNode) + Send + Sync + 'static,
{
    let action = Arc::new(action);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period.max(Duration::from_millis(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }

            let node = node.clone();
            let action = action.clone();
            if let Err(e) = tokio::task::spawn_blocking(move || action(&*node)).await {
                tracing::warn!(action = name, "periodic action panicked: {e}");
            }
        }
        tracing::debug!(action = name, "periodic action stopped");
    })
}
