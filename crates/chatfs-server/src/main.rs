//! # chatfs-server
//!
//! Serves a chat account as a 9P file tree.
//!
//! This binary:
//! - opens the **history database** and rebuilds the tree from it
//! - starts the **backend bridge**, a child process exchanging JSON lines
//!   with the messaging backend
//! - runs the **event worker** applying backend events to the tree
//! - serves the tree over **9P2000** on a TCP listener

mod bridge;
mod config;
mod error;
mod ninep;

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use chatfs_fs::{reconcile, AuthFlow, ChatFs, FsError, Reconciler};
use chatfs_store::Database;

use crate::config::ServerConfig;
use crate::error::auth_input_variable;

/// Backend events buffered ahead of the worker.
const EVENT_QUEUE_DEPTH: usize = 256;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,chatfs_server=debug")),
        )
        .init();

    info!("Starting chatfs v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    let data_dir = config
        .resolve_data_dir()
        .context("no data directory configured and no platform default")?;
    tokio::fs::create_dir_all(&data_dir)
        .await
        .with_context(|| format!("creating data directory {}", data_dir.display()))?;

    // -----------------------------------------------------------------------
    // 3. Open the history and rebuild the tree
    // -----------------------------------------------------------------------
    let history_path = ServerConfig::history_path(&data_dir);
    let db = Database::open_at(&history_path)
        .with_context(|| format!("opening history database {}", history_path.display()))?;
    info!(path = %history_path.display(), "History database opened");

    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::channel::<String>(EVENT_QUEUE_DEPTH);

    let fs = Arc::new(ChatFs::new(db, command_tx));
    let reconciler = Reconciler::new(fs.clone(), AuthFlow::new(config.auth_settings(&data_dir)));
    reconciler.load_history().context("loading history")?;

    // -----------------------------------------------------------------------
    // 4. Connect the backend
    // -----------------------------------------------------------------------
    // Without a bridge the event sender is parked here so the worker keeps
    // waiting instead of reporting a closed backend.
    let _parked_events = match &config.bridge {
        Some(argv) => {
            bridge::spawn(argv, command_rx, event_tx).context("starting the backend bridge")?;
            None
        }
        None => {
            warn!("CHATFS_BRIDGE not set, serving history without a backend");
            tokio::spawn(bridge::discard_commands(command_rx));
            Some(event_tx)
        }
    };

    let worker = tokio::task::spawn_blocking(move || reconcile::run(&reconciler, event_rx));

    // -----------------------------------------------------------------------
    // 5. Serve 9P until shutdown or a fatal backend error
    // -----------------------------------------------------------------------
    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    info!(addr = %config.listen_addr, "Serving 9P");

    tokio::select! {
        result = ninep::serve(listener, fs, config.owner.clone()) => {
            if let Err(e) = result {
                error!(error = %e, "9P listener failed");
                return Err(e.into());
            }
        }
        result = worker => {
            match result? {
                Err(FsError::MissingAuthInput(input)) => {
                    error!(
                        "The backend requires {input}. Restart chatfs with {} set; \
                         it is only needed until authorization succeeds.",
                        auth_input_variable(input)
                    );
                    anyhow::bail!("authorization requires {input}");
                }
                Err(e) => {
                    error!(error = %e, "Event worker stopped");
                    return Err(e.into());
                }
                Ok(()) => {}
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
