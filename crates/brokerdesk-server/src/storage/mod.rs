//! SQLite storage for the brokerdesk server.
//!
//! Provides persistence for brokers, users, the topic catalogue, the
//! subscription and favourite ledgers, and message history.

mod db;
mod models;
mod queries_identity;
mod queries_ledger;
mod queries_messages;
mod queries_topics;


pub use db::{Database, DatabaseError};
pub use models::*;
