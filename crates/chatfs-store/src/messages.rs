//! Helpers for the `messages` collection (message id -> record).

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use chatfs_shared::{ChatId, MessageId};

use crate::database::Tx;
use crate::error::Result;
use crate::models::MessageRecord;

const COLUMNS: &str = "id, chat_id, sent_at, sender, quoted_text, text, is_outgoing";

impl Tx<'_> {
    /// Insert or overwrite a message record.
    pub fn put_message(&self, message: &MessageRecord) -> Result<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO messages
                 (id, chat_id, sent_at, sender, quoted_text, text, is_outgoing)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                message.id.0,
                message.chat_id.0,
                message.sent_at.to_rfc3339(),
                message.sender,
                message.quoted_text,
                message.text,
                message.is_outgoing,
            ],
        )?;
        Ok(())
    }

    pub fn message(&self, id: MessageId) -> Result<Option<MessageRecord>> {
        let message = self
            .conn()
            .query_row(
                &format!("SELECT {COLUMNS} FROM messages WHERE id = ?1"),
                params![id.0],
                row_to_message,
            )
            .optional()?;
        Ok(message)
    }

    /// Every stored message, oldest first. Ties are broken by id so the
    /// order is stable.
    pub fn list_messages(&self) -> Result<Vec<MessageRecord>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {COLUMNS} FROM messages ORDER BY sent_at ASC, id ASC"
        ))?;

        let rows = stmt.query_map([], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Delete a message record.  Returns `true` if a row was deleted.
    pub fn delete_message(&self, id: MessageId) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM messages WHERE id = ?1", params![id.0])?;
        Ok(affected > 0)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRecord> {
    let ts_str: String = row.get(2)?;
    let sent_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&ts_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(MessageRecord {
        id: MessageId(row.get(0)?),
        chat_id: ChatId(row.get(1)?),
        sent_at,
        sender: row.get(3)?,
        quoted_text: row.get(4)?,
        text: row.get(5)?,
        is_outgoing: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use crate::Database;

    use super::*;

    fn record(id: i64, secs: i64, text: &str) -> MessageRecord {
        MessageRecord {
            id: MessageId(id),
            chat_id: ChatId(42),
            sent_at: Utc.timestamp_opt(secs, 0).unwrap(),
            sender: "ann".into(),
            quoted_text: String::new(),
            text: text.into(),
            is_outgoing: false,
        }
    }

    #[test]
    fn put_overwrites_and_get_reads_back() {
        let mut db = Database::open_in_memory().unwrap();
        db.update(|tx| {
            tx.put_message(&record(1, 100, "hello"))?;
            tx.put_message(&record(1, 100, "hello again"))
        })
        .unwrap();

        let stored = db.view(|tx| tx.message(MessageId(1))).unwrap().unwrap();
        assert_eq!(stored, record(1, 100, "hello again"));
        assert_eq!(db.view(|tx| tx.list_messages()).unwrap().len(), 1);
        assert_eq!(db.view(|tx| tx.message(MessageId(2))).unwrap(), None);
    }

    #[test]
    fn list_is_ordered_by_time_then_id() {
        let mut db = Database::open_in_memory().unwrap();
        db.update(|tx| {
            tx.put_message(&record(3, 200, "c"))?;
            tx.put_message(&record(2, 100, "b"))?;
            tx.put_message(&record(1, 200, "a"))
        })
        .unwrap();

        let ids: Vec<i64> = db
            .view(|tx| tx.list_messages())
            .unwrap()
            .iter()
            .map(|m| m.id.0)
            .collect();
        assert_eq!(ids, [2, 1, 3]);
    }

    #[test]
    fn delete_message() {
        let mut db = Database::open_in_memory().unwrap();
        db.update(|tx| tx.put_message(&record(1, 100, "x"))).unwrap();
        assert!(db.update(|tx| tx.delete_message(MessageId(1))).unwrap());
        assert!(!db.update(|tx| tx.delete_message(MessageId(1))).unwrap());
    }
}
