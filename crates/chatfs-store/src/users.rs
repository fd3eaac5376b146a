//! Helpers for the `users` collection (user id -> handle).

use rusqlite::{params, OptionalExtension};

use chatfs_shared::UserId;

use crate::database::Tx;
use crate::error::Result;

impl Tx<'_> {
    /// Insert or replace the handle of a user.
    pub fn put_user_handle(&self, id: UserId, handle: &str) -> Result<()> {
        self.conn().execute(
            "INSERT INTO users (id, handle) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET handle = excluded.handle",
            params![id.0, handle],
        )?;
        Ok(())
    }

    pub fn user_handle(&self, id: UserId) -> Result<Option<String>> {
        let handle = self
            .conn()
            .query_row(
                "SELECT handle FROM users WHERE id = ?1",
                params![id.0],
                |row| row.get(0),
            )
            .optional()?;
        Ok(handle)
    }
}
