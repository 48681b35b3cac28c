//! Message history queries. Messages are append-only.

use brokerdesk_core::db::unix_timestamp;

use super::db::{Database, DatabaseError};
use super::models::{MessageView, NewMessage};

impl Database {
    /// Append a message and return its id.
    pub async fn insert_message(&self, message: &NewMessage<'_>) -> Result<i64, DatabaseError> {
        let result = sqlx::query(
            "INSERT INTO messages (user_id, topic_id, broker_id, qos, message, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(message.user_id)
        .bind(message.topic_id)
        .bind(message.broker_id)
        .bind(i64::from(message.qos))
        .bind(message.message)
        .bind(unix_timestamp())
        .execute(self.pool())
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Newest-first history of one catalogued topic.
    pub async fn list_messages(
        &self,
        broker_id: i64,
        topic_id: i64,
        limit: u32,
    ) -> Result<Vec<MessageView>, DatabaseError> {
        let messages = sqlx::query_as::<_, MessageView>(
            "SELECT m.id, t.topic, u.client_id, u.outsider, m.qos, m.message, m.created_at \
             FROM messages m \
             LEFT JOIN topics t ON t.id = m.topic_id \
             LEFT JOIN users u ON u.id = m.user_id \
             WHERE m.broker_id = ? AND m.topic_id = ? \
             ORDER BY m.created_at DESC, m.id DESC LIMIT ?",
        )
        .bind(broker_id)
        .bind(topic_id)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        Ok(messages)
    }
}
