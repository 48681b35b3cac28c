//! Database connection and initialization.

pub use brokerdesk_core::db::DatabaseError;

brokerdesk_core::define_database!(Database, "Database migrations complete");

impl Database {
    /// Check that the pool can still execute statements.
    pub async fn ping(&self) -> Result<(), DatabaseError> {
        brokerdesk_core::db::ping(self.pool()).await
    }
}
