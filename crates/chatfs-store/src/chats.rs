//! Helpers for the `chats` collection (handle -> chat id).

use rusqlite::{params, OptionalExtension};

use chatfs_shared::ChatId;

use crate::database::Tx;
use crate::error::Result;
use crate::models::ChatRecord;

impl Tx<'_> {
    /// Remember a chat under the given handle, replacing any previous id.
    pub fn put_chat(&self, handle: &str, chat_id: ChatId) -> Result<()> {
        self.conn().execute(
            "INSERT INTO chats (handle, chat_id) VALUES (?1, ?2)
             ON CONFLICT(handle) DO UPDATE SET chat_id = excluded.chat_id",
            params![handle, chat_id.0],
        )?;
        Ok(())
    }

    pub fn chat_id(&self, handle: &str) -> Result<Option<ChatId>> {
        let id = self
            .conn()
            .query_row(
                "SELECT chat_id FROM chats WHERE handle = ?1",
                params![handle],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id.map(ChatId))
    }

    /// All remembered chats, ordered by handle.
    pub fn list_chats(&self) -> Result<Vec<ChatRecord>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT handle, chat_id FROM chats ORDER BY handle ASC")?;

        let rows = stmt.query_map([], |row| {
            Ok(ChatRecord {
                handle: row.get(0)?,
                chat_id: ChatId(row.get(1)?),
            })
        })?;

        let mut chats = Vec::new();
        for row in rows {
            chats.push(row?);
        }
        Ok(chats)
    }

    /// Forget a chat.  Returns `true` if a row was deleted.
    pub fn delete_chat(&self, handle: &str) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM chats WHERE handle = ?1", params![handle])?;
        Ok(affected > 0)
    }
}
