use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use slate_protocol::{NodeConfig, NodeId, PeerNode, Role};
use slate_store::{ChannelStore, DirStore, DirStoreConfig};

/// Setup Ctrl+C handler, returns a flag that goes false on signal.
pub fn setup_ctrlc() -> Arc<AtomicBool> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        eprintln!("\nCtrl+C received, shutting down...");
        r.store(false, Ordering::Relaxed);
    });
    running
}

/// Open the shared directory store. `None` falls back to `SLATE_STORE_DIR`,
/// then the temp dir.
pub fn open_store(dir: Option<PathBuf>) -> anyhow::Result<Arc<DirStore>> {
    let mut config = DirStoreConfig::new();
    if let Some(dir) = dir {
        config = config.root(dir);
    }
    let root = config.root_path().display().to_string();
    let store = DirStore::open(config).with_context(|| format!("cannot open store at {root}"))?;
    Ok(Arc::new(store))
}

/// Build this process's node on `store`.
pub fn build_node(
    store: Arc<DirStore>,
    id: &str,
    namespace: u16,
    coordinator: bool,
    config: NodeConfig,
) -> anyhow::Result<Arc<PeerNode>> {
    let role = if coordinator {
        Role::Coordinator
    } else {
        Role::Participant
    };
    let id = NodeId::new(id, role, namespace).context("invalid node id")?;
    let store: Arc<dyn ChannelStore> = store;
    Ok(Arc::new(PeerNode::new(store, id, config)))
}

/// Elapsed seconds since `start`.
pub fn elapsed_s(start: std::time::Instant) -> f64 {
    start.elapsed().as_secs_f64()
}
