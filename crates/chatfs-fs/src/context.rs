use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use chatfs_shared::BackendCommand;
use chatfs_store::{Database, Tx};

use crate::error::Result;

/// Sending half of the backend command queue.
pub type CommandSender = mpsc::UnboundedSender<BackendCommand>;

/// Shared services every node operation may touch: the history store and
/// the backend command queue.
#[derive(Clone)]
pub struct NodeContext {
    db: Arc<Mutex<Database>>,
    commands: CommandSender,
}

impl NodeContext {
    pub fn new(db: Database, commands: CommandSender) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            commands,
        }
    }

    fn lock_db(&self) -> MutexGuard<'_, Database> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` in a store write transaction.
    pub fn update<T>(&self, f: impl FnOnce(&Tx<'_>) -> Result<T>) -> Result<T> {
        self.lock_db().update(f)
    }

    /// Run `f` in a store read transaction.
    pub fn view<T>(&self, f: impl FnOnce(&Tx<'_>) -> Result<T>) -> Result<T> {
        self.lock_db().view(f)
    }

    /// Queue a command for the backend. Commands are fire-and-forget.
    pub fn send(&self, command: BackendCommand) {
        debug!(?command, "Queueing backend command");
        if self.commands.send(command).is_err() {
            warn!("Backend command queue closed, command dropped");
        }
    }
}
