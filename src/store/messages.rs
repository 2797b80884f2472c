//! messages table CRUD
//!
//! Message ids are allocated by the message cache, not by the store, so
//! inserts carry explicit ids and the cache seeds its counter from
//! [`Store::max_message_id`].

use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::error::Result;
use crate::locking::HeldLock;
use crate::model::Message;

use super::Store;

fn message_from_row(row: &SqliteRow) -> Result<Message> {
    Ok(Message {
        id: row.try_get("id")?,
        recipient_id: row.try_get("recipient_id")?,
        text: row.try_get("message")?,
        created_at: row.try_get("created_at")?,
        is_read: row.try_get("is_read")?,
    })
}

impl Store {
    /// Insert a message with its cache-assigned id.
    pub async fn insert_message(&self, held: &dyn HeldLock, message: &Message) -> Result<()> {
        let _table = self.db_messages.write_after(held).await?;
        sqlx::query(
            "INSERT INTO messages (id, recipient_id, message, created_at, is_read) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(message.id)
        .bind(message.recipient_id)
        .bind(&message.text)
        .bind(message.created_at)
        .bind(message.is_read)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Highest assigned message id, 0 when the table is empty.
    pub async fn max_message_id(&self, held: &dyn HeldLock) -> Result<i64> {
        let _table = self.db_messages.read_after(held).await?;
        let max: Option<i64> = sqlx::query_scalar("SELECT MAX(id) FROM messages")
            .fetch_one(self.pool())
            .await?;
        Ok(max.unwrap_or(0))
    }

    /// Every stored message for a recipient, newest first.
    pub async fn load_messages_for_recipient(
        &self,
        held: &dyn HeldLock,
        recipient_id: i64,
    ) -> Result<Vec<Message>> {
        let _table = self.db_messages.read_after(held).await?;
        let rows = sqlx::query(
            "SELECT * FROM messages WHERE recipient_id = ? ORDER BY created_at DESC, id DESC",
        )
        .bind(recipient_id)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(message_from_row).collect()
    }

    /// Set the read flag on a batch of messages in one statement.
    pub async fn set_messages_read(
        &self,
        held: &dyn HeldLock,
        ids: &[i64],
        is_read: bool,
    ) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let _table = self.db_messages.write_after(held).await?;
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!("UPDATE messages SET is_read = ? WHERE id IN ({placeholders})");
        let mut query = sqlx::query(&sql).bind(is_read);
        for id in ids {
            query = query.bind(id);
        }
        query.execute(self.pool()).await?;
        Ok(())
    }

    /// Delete read messages created at or before `cutoff`. Returns the
    /// number of rows removed.
    pub async fn delete_read_messages_before(
        &self,
        held: &dyn HeldLock,
        cutoff: i64,
    ) -> Result<u64> {
        let _table = self.db_messages.write_after(held).await?;
        let result = sqlx::query("DELETE FROM messages WHERE is_read = 1 AND created_at <= ?")
            .bind(cutoff)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected())
    }
}
