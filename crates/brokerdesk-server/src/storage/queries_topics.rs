//! Topic catalogue queries.

use brokerdesk_core::db::unix_timestamp;

use super::db::{Database, DatabaseError};
use super::models::Topic;

impl Database {
    /// Return the id of `topic` on a broker, cataloguing it on first sight.
    ///
    /// Catalogue rows are never removed by subscription churn.
    pub async fn resolve_or_create_topic(
        &self,
        broker_id: i64,
        topic: &str,
    ) -> Result<i64, DatabaseError> {
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO topics (broker_id, topic, created_at) VALUES (?, ?, ?) \
             ON CONFLICT(broker_id, topic) DO UPDATE SET topic = topic RETURNING id",
        )
        .bind(broker_id)
        .bind(topic)
        .bind(unix_timestamp())
        .fetch_one(self.pool())
        .await?;

        Ok(id)
    }

    /// Look up a catalogued topic by name.
    pub async fn find_topic(
        &self,
        broker_id: i64,
        topic: &str,
    ) -> Result<Option<Topic>, DatabaseError> {
        let row = sqlx::query_as::<_, Topic>("SELECT * FROM topics WHERE broker_id = ? AND topic = ?")
            .bind(broker_id)
            .bind(topic)
            .fetch_optional(self.pool())
            .await?;

        Ok(row)
    }

    /// List every topic ever catalogued for a broker, oldest first.
    pub async fn list_topics_for_broker(&self, broker_id: i64) -> Result<Vec<Topic>, DatabaseError> {
        let topics = sqlx::query_as::<_, Topic>(
            "SELECT * FROM topics WHERE broker_id = ? ORDER BY created_at ASC, id ASC",
        )
        .bind(broker_id)
        .fetch_all(self.pool())
        .await?;

        Ok(topics)
    }
}
