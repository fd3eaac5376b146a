//! Database connection management.
//!
//! The [`Database`] struct owns a [`rusqlite::Connection`] and guarantees that
//! migrations are run before any other operation. Reads and writes happen
//! through [`Database::view`] and [`Database::update`], so callers never see
//! a partially applied change.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use rusqlite::{Connection, TransactionBehavior};

use crate::error::{Result, StoreError};
use crate::migrations;

/// Wrapper around a [`rusqlite::Connection`].
pub struct Database {
    conn: Connection,
}

/// Typed access to the store inside a transaction.
///
/// CRUD helpers live in the `users`, `chats` and `messages` modules.
pub struct Tx<'a> {
    conn: &'a Connection,
}

impl<'a> Tx<'a> {
    pub(crate) fn conn(&self) -> &'a Connection {
        self.conn
    }
}

impl Database {
    /// Open (or create) a database at an explicit path.
    pub fn open_at(path: &Path) -> Result<Self> {
        tracing::info!(path = %path.display(), "opening database");

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init(conn)
    }

    /// Open a private in-memory database. Used by tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        migrations::run_migrations(&conn)?;
        Ok(Self { conn })
    }

    /// Run `f` inside a write transaction. The transaction commits when `f`
    /// returns `Ok` and rolls back otherwise.
    pub fn update<T, E>(
        &mut self,
        f: impl FnOnce(&Tx<'_>) -> std::result::Result<T, E>,
    ) -> std::result::Result<T, E>
    where
        E: From<StoreError>,
    {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StoreError::from)?;
        let out = f(&Tx { conn: &tx })?;
        tx.commit().map_err(StoreError::from)?;
        Ok(out)
    }

    /// Run `f` inside a read transaction, giving it a consistent snapshot.
    pub fn view<T, E>(
        &mut self,
        f: impl FnOnce(&Tx<'_>) -> std::result::Result<T, E>,
    ) -> std::result::Result<T, E>
    where
        E: From<StoreError>,
    {
        let tx = self.conn.transaction().map_err(StoreError::from)?;
        let out = f(&Tx { conn: &tx })?;
        tx.finish().map_err(StoreError::from)?;
        Ok(out)
    }

    /// Return the filesystem path of the open database (if any).
    pub fn path(&self) -> Option<PathBuf> {
        self.conn.path().map(PathBuf::from)
    }
}

/// Platform data directory for chatfs:
/// - Linux: `~/.local/share/chatfs`
/// - macOS: `~/Library/Application Support/org.chatfs.chatfs`
pub fn default_data_dir() -> Result<PathBuf> {
    let project_dirs =
        ProjectDirs::from("org", "chatfs", "chatfs").ok_or(StoreError::NoDataDir)?;
    Ok(project_dirs.data_dir().to_path_buf())
}

#[cfg(test)]
mod tests {
    use chatfs_shared::{ChatId, UserId};

    use super::*;

    #[test]
    fn open_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");

        let db = Database::open_at(&path).expect("should open");
        assert!(db.path().is_some());
    }

    #[test]
    fn failed_update_rolls_back() {
        let mut db = Database::open_in_memory().unwrap();
        let result: std::result::Result<(), StoreError> = db.update(|tx| {
            tx.put_user_handle(UserId(7), "ann")?;
            tx.put_chat("ann", ChatId(7))?;
            Err(StoreError::Migration("forced".into()))
        });
        assert!(result.is_err());

        let (handle, chats) = db
            .view(|tx| Ok::<_, StoreError>((tx.user_handle(UserId(7))?, tx.list_chats()?)))
            .unwrap();
        assert_eq!(handle, None);
        assert!(chats.is_empty());
    }

    #[test]
    fn reopen_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.db");
        {
            let mut db = Database::open_at(&path).unwrap();
            db.update(|tx| tx.put_user_handle(UserId(7), "ann")).unwrap();
        }
        let mut db = Database::open_at(&path).unwrap();
        let handle = db.view(|tx| tx.user_handle(UserId(7))).unwrap();
        assert_eq!(handle.as_deref(), Some("ann"));
    }
}
