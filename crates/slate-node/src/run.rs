use crate::common::{elapsed_s, setup_ctrlc};
use crate::events::{emit, now_iso, EventLog, EventMesh, EventStarted, EventStopped};
use slate_protocol::{EventBus, LogRecord, NodeRuntime, PeerNode, RuntimeConfig};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct RunConfig {
    pub runtime: RuntimeConfig,
    /// Restore the saved snapshot before starting.
    pub restore: bool,
    /// Save a snapshot when stopping.
    pub snapshot_on_exit: bool,
    /// Export messages when stopping; `Some(None)` exports to the store.
    pub export_on_exit: Option<Option<PathBuf>>,
    /// Log bus to forward as `log` events, if `--logs` was given.
    pub logs: Option<Arc<EventBus<LogRecord>>>,
    pub store_root: String,
}

/// Drive the node until Ctrl+C, printing every mesh event as JSONL.
pub async fn run(node: Arc<PeerNode>, config: RunConfig, start: Instant) -> anyhow::Result<()> {
    let id = node.id().clone();
    emit(&EventStarted::new(
        id.id(),
        id.namespace(),
        &id.role().to_string(),
        &config.store_root,
    ));
    eprintln!("Running as {id} ({}) on {}", id.role(), config.store_root);
    eprintln!("Press Ctrl+C to stop.\n");

    if config.restore {
        let node = node.clone();
        let restored = tokio::task::spawn_blocking(move || node.load_snapshot()).await?;
        eprintln!("snapshot restored: {restored}");
    }

    let mut mesh_events = node.events().subscribe();
    let mut log_events = config.logs.as_ref().map(|bus| bus.subscribe());
    let running = setup_ctrlc();
    let handle = NodeRuntime::spawn(node.clone(), config.runtime);

    let mut seen: u64 = 0;
    while running.load(Ordering::Relaxed) {
        // Short timeout so the running flag is checked regularly
        let next = tokio::time::timeout(Duration::from_millis(500), async {
            match log_events.as_mut() {
                Some(logs) => tokio::select! {
                    event = mesh_events.recv() => event.map(Forwarded::Mesh),
                    record = logs.recv() => record.map(Forwarded::Log),
                },
                None => mesh_events.recv().await.map(Forwarded::Mesh),
            }
        })
        .await;

        match next {
            Ok(Some(Forwarded::Mesh(event))) => {
                seen += 1;
                emit(&EventMesh::new(&event));
            }
            Ok(Some(Forwarded::Log(record))) => emit(&EventLog::new(&record)),
            Ok(None) => break,
            Err(_) => continue,
        }
    }

    handle.shutdown().await;

    let snapshot_saved = if config.snapshot_on_exit {
        Some(handle.save_snapshot().await)
    } else {
        None
    };
    let exported = match config.export_on_exit {
        Some(path) => Some(handle.export_messages(path).await),
        None => None,
    };

    emit(&EventStopped {
        event: "stopped",
        events_seen: seen,
        snapshot_saved,
        exported,
        elapsed_s: elapsed_s(start),
        timestamp: now_iso(),
    });
    eprintln!("\n{id}: {seen} mesh events.");
    Ok(())
}

enum Forwarded {
    Mesh(slate_protocol::MeshEvent),
    Log(LogRecord),
}
