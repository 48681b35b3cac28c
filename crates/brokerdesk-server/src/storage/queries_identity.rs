//! Broker and user identity queries.
//!
//! Resolve-or-create is a single upsert statement: a conflicting insert turns
//! into a no-op update so `RETURNING` yields the existing id. Two concurrent
//! first connections therefore agree on one row without a check-then-insert.

use brokerdesk_core::db::unix_timestamp;

use super::db::{Database, DatabaseError};
use super::models::{NewUser, User};

impl Database {
    // =========================================================================
    // Broker queries
    // =========================================================================

    /// Return the id of the broker at `ip:port`, creating it on first sight.
    pub async fn resolve_or_create_broker(&self, ip: &str, port: u16) -> Result<i64, DatabaseError> {
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO brokers (ip, port, created_at) VALUES (?, ?, ?) \
             ON CONFLICT(ip, port) DO UPDATE SET ip = ip RETURNING id",
        )
        .bind(ip)
        .bind(i64::from(port))
        .bind(unix_timestamp())
        .fetch_one(self.pool())
        .await?;

        Ok(id)
    }

    // =========================================================================
    // User queries
    // =========================================================================

    /// Return the id of the user matching every identity field, creating it
    /// on first sight.
    pub async fn resolve_or_create_user(&self, user: NewUser<'_>) -> Result<i64, DatabaseError> {
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO users (broker_id, client_id, username, password, outsider, created_at) \
             VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT(broker_id, client_id, username, password, outsider) \
             DO UPDATE SET client_id = client_id RETURNING id",
        )
        .bind(user.broker_id)
        .bind(user.client_id)
        .bind(user.username)
        .bind(user.password)
        .bind(user.outsider)
        .bind(unix_timestamp())
        .fetch_one(self.pool())
        .await?;

        Ok(id)
    }

    /// Get a user by ID.
    pub async fn get_user(&self, id: i64) -> Result<User, DatabaseError> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("User {id}")))
    }

    /// Find the user a client id denotes on a broker.
    ///
    /// Authenticated users win over outsiders sharing the client id; among
    /// equals the oldest row wins.
    pub async fn find_user_by_client_and_broker(
        &self,
        client_id: &str,
        broker_id: i64,
    ) -> Result<User, DatabaseError> {
        sqlx::query_as::<_, User>(
            "SELECT * FROM users WHERE client_id = ? AND broker_id = ? \
             ORDER BY outsider ASC, id ASC LIMIT 1",
        )
        .bind(client_id)
        .bind(broker_id)
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| {
            DatabaseError::NotFound(format!("User with client id {client_id} on broker {broker_id}"))
        })
    }
}
