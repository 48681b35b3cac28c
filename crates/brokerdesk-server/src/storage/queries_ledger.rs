//! Subscription and favourite ledger queries.
//!
//! Both junctions share one shape, so every query takes the [`Ledger`] it
//! operates on. Table names come from [`Ledger::table`], never from input.

use brokerdesk_core::db::unix_timestamp;

use super::db::{Database, DatabaseError};
use super::models::{Ledger, LedgerEntry, LedgerInsert, TopicMark};

impl Database {
    /// Every catalogued topic of a broker, flagged with whether `ledger`
    /// holds a row for it under `user_id`.
    pub async fn ledger_snapshot(
        &self,
        ledger: Ledger,
        broker_id: i64,
        user_id: i64,
    ) -> Result<Vec<TopicMark>, DatabaseError> {
        let sql = format!(
            "SELECT t.id, t.topic, EXISTS ( \
                 SELECT 1 FROM {table} l \
                 WHERE l.topic_id = t.id AND l.broker_id = t.broker_id AND l.user_id = ? \
             ) AS marked \
             FROM topics t WHERE t.broker_id = ? ORDER BY t.id",
            table = ledger.table()
        );

        let marks = sqlx::query_as::<_, TopicMark>(&sql)
            .bind(user_id)
            .bind(broker_id)
            .fetch_all(self.pool())
            .await?;

        Ok(marks)
    }

    /// Add a ledger row. A duplicate is reported, never written twice.
    pub async fn insert_ledger_entry(
        &self,
        ledger: Ledger,
        broker_id: i64,
        user_id: i64,
        topic_id: i64,
    ) -> Result<LedgerInsert, DatabaseError> {
        let sql = format!(
            "INSERT INTO {table} (broker_id, user_id, topic_id, created_at) VALUES (?, ?, ?, ?) \
             ON CONFLICT(broker_id, user_id, topic_id) DO NOTHING",
            table = ledger.table()
        );

        let result = sqlx::query(&sql)
            .bind(broker_id)
            .bind(user_id)
            .bind(topic_id)
            .bind(unix_timestamp())
            .execute(self.pool())
            .await?;

        Ok(if result.rows_affected() > 0 {
            LedgerInsert::Inserted
        } else {
            LedgerInsert::AlreadyPresent
        })
    }

    /// Delete a ledger row. Returns `false` if there was none.
    pub async fn delete_ledger_entry(
        &self,
        ledger: Ledger,
        broker_id: i64,
        user_id: i64,
        topic_id: i64,
    ) -> Result<bool, DatabaseError> {
        let sql = format!(
            "DELETE FROM {table} WHERE broker_id = ? AND user_id = ? AND topic_id = ?",
            table = ledger.table()
        );

        let result = sqlx::query(&sql)
            .bind(broker_id)
            .bind(user_id)
            .bind(topic_id)
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// List a user's ledger rows with topic names, oldest first.
    pub async fn list_ledger(
        &self,
        ledger: Ledger,
        broker_id: i64,
        user_id: i64,
    ) -> Result<Vec<LedgerEntry>, DatabaseError> {
        let sql = format!(
            "SELECT l.id, l.broker_id, l.user_id, l.topic_id, t.topic, l.created_at \
             FROM {table} l JOIN topics t ON t.id = l.topic_id \
             WHERE l.broker_id = ? AND l.user_id = ? ORDER BY l.created_at ASC, l.id ASC",
            table = ledger.table()
        );

        let entries = sqlx::query_as::<_, LedgerEntry>(&sql)
            .bind(broker_id)
            .bind(user_id)
            .fetch_all(self.pool())
            .await?;

        Ok(entries)
    }

    /// Distinct topic filters any user holds a subscription to on a broker.
    pub async fn subscribed_filters(&self, broker_id: i64) -> Result<Vec<String>, DatabaseError> {
        let filters = sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT t.topic FROM subscriptions s JOIN topics t ON t.id = s.topic_id \
             WHERE s.broker_id = ?",
        )
        .bind(broker_id)
        .fetch_all(self.pool())
        .await?;

        Ok(filters)
    }
}
