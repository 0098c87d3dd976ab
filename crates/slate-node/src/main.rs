mod commands;
mod common;
mod events;
mod output;
mod run;

use clap::{Parser, Subcommand};
use slate_protocol::{logging, EventBus, NodeConfig, RetryPolicy, RuntimeConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(name = "slate", about = "Node for a mesh that shares nothing but a directory")]
struct Cli {
    /// Shared store directory (default: $SLATE_STORE_DIR, else <tmp>/slate).
    #[arg(long, global = true)]
    store_dir: Option<PathBuf>,

    /// This node's id: letters, digits, '_' and '-'.
    #[arg(long, global = true, default_value = "node")]
    id: String,

    /// Namespace of this node. Nodes are keyed by id and namespace together.
    #[arg(long, global = true, default_value = "7000")]
    namespace: u16,

    /// Run as the coordinator.
    #[arg(long, global = true)]
    coordinator: bool,

    /// Also append every JSONL line to this file.
    #[arg(long, global = true)]
    jsonl: Option<PathBuf>,

    /// Seconds without a heartbeat before a peer counts as dead.
    #[arg(long, global = true, default_value = "10")]
    heartbeat_timeout: u64,

    /// Attempts per shared-log update before giving up.
    #[arg(long, global = true, default_value = "3")]
    retries: u32,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Join the mesh and print events as JSONL until Ctrl+C.
    Run {
        /// Heartbeat interval in ms.
        #[arg(long, default_value = "5000")]
        heartbeat_ms: u64,
        /// Routing announcement interval in ms.
        #[arg(long, default_value = "30000")]
        announce_ms: u64,
        /// Message poll interval in ms.
        #[arg(long, default_value = "1000")]
        poll_ms: u64,
        /// Restore the saved snapshot first.
        #[arg(long)]
        restore: bool,
        /// Save a snapshot on exit.
        #[arg(long)]
        snapshot_on_exit: bool,
        /// Export messages on exit (to the store unless --export-path).
        #[arg(long)]
        export_on_exit: bool,
        /// File for the exit export.
        #[arg(long, requires = "export_on_exit")]
        export_path: Option<PathBuf>,
        /// Forward the node's own log records as `log` events.
        #[arg(long)]
        logs: bool,
    },

    /// Send a broadcast, or a private message with --to.
    Send {
        /// Message text.
        body: String,
        /// Recipient id.
        #[arg(long)]
        to: Option<String>,
    },

    /// Print messages: everything readable, one conversation, or broadcasts.
    Read {
        /// Only the private log with this peer.
        #[arg(long, conflicts_with = "broadcast")]
        with: Option<String>,
        /// Only the broadcast log.
        #[arg(long)]
        broadcast: bool,
    },

    /// Registered peers and the ones with a live heartbeat.
    Peers {
        /// Liveness window in seconds.
        #[arg(long, default_value = "10")]
        timeout_secs: u64,
    },

    /// Heartbeat status of one peer.
    Status {
        peer: String,
        #[arg(long)]
        peer_namespace: u16,
    },

    /// Merge announcements and print the routing table.
    Routes,

    /// Conversation partners and every id seen sending.
    Participants,

    /// Node, routing, message and network state as one JSON object.
    Health,

    /// Write everything this node can read as JSON.
    Export {
        /// Output file (default: the node's export channel).
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Delete the broadcast log, or the private log with --with.
    Clear {
        #[arg(long)]
        with: Option<String>,
    },

    /// Delete heartbeats, announcements, the registry and ack markers.
    Reset {
        /// Also delete message logs, snapshots and exports.
        #[arg(long)]
        all: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let start = Instant::now();

    let log_bus = match &cli.command {
        Command::Run { logs: true, .. } => Some(Arc::new(EventBus::new(256))),
        _ => None,
    };
    logging::init("warn", log_bus.clone())?;

    if let Some(path) = &cli.jsonl {
        output::init_jsonl_writer(path)?;
    }

    let store = common::open_store(cli.store_dir.clone())?;
    let store_root = store.root().display().to_string();
    let config = NodeConfig::new()
        .heartbeat_timeout(Duration::from_secs(cli.heartbeat_timeout))
        .retry(RetryPolicy::new(cli.retries, Duration::from_millis(100)));
    let node = common::build_node(store, &cli.id, cli.namespace, cli.coordinator, config)?;

    match cli.command {
        Command::Run {
            heartbeat_ms,
            announce_ms,
            poll_ms,
            restore,
            snapshot_on_exit,
            export_on_exit,
            export_path,
            logs: _,
        } => {
            let runtime = RuntimeConfig {
                heartbeat_interval: Duration::from_millis(heartbeat_ms),
                announce_interval: Duration::from_millis(announce_ms),
                message_poll_interval: Duration::from_millis(poll_ms),
                delivery_poll_interval: Duration::from_millis(poll_ms),
                ..RuntimeConfig::default()
            };
            run::run(
                node,
                run::RunConfig {
                    runtime,
                    restore,
                    snapshot_on_exit,
                    export_on_exit: export_on_exit.then_some(export_path),
                    logs: log_bus,
                    store_root,
                },
                start,
            )
            .await?;
        }

        Command::Send { body, to } => commands::send(&node, to.as_deref(), &body),

        Command::Read { with, broadcast } => commands::read(&node, with.as_deref(), broadcast),

        Command::Peers { timeout_secs } => {
            commands::peers(&node, Duration::from_secs(timeout_secs));
        }

        Command::Status {
            peer,
            peer_namespace,
        } => commands::status(&node, &peer, peer_namespace),

        Command::Routes => commands::routes(&node),

        Command::Participants => commands::participants(&node),

        Command::Health => commands::health(&node),

        Command::Export { out } => commands::export(&node, out.as_deref()),

        Command::Clear { with } => commands::clear(&node, with.as_deref()),

        Command::Reset { all } => commands::reset(&node, all)?,
    }

    Ok(())
}
