//! Data models for brokerdesk storage.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub broker_id: i64,
    pub client_id: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub outsider: bool,
    pub created_at: i64,
}

/// Identity of a user row; every field takes part in uniqueness.
#[derive(Debug, Clone, Copy)]
pub struct NewUser<'a> {
    pub broker_id: i64,
    pub client_id: &'a str,
    pub username: &'a str,
    pub password: &'a str,
    pub outsider: bool,
}

impl<'a> NewUser<'a> {
    /// A publisher seen on the wire that never authenticated here.
    pub const fn outsider(broker_id: i64, client_id: &'a str) -> Self {
        Self {
            broker_id,
            client_id,
            username: "",
            password: "",
            outsider: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Topic {
    pub id: i64,
    pub broker_id: i64,
    pub topic: String,
    pub created_at: i64,
}

/// A catalogued topic and whether a ledger holds a row for it.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TopicMark {
    pub id: i64,
    pub topic: String,
    pub marked: bool,
}

/// A ledger row joined with its topic name.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub id: i64,
    pub broker_id: i64,
    pub user_id: i64,
    pub topic_id: i64,
    pub topic: String,
    pub created_at: i64,
}

/// The two junctions between users and catalogued topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ledger {
    Subscriptions,
    Favourites,
}

impl Ledger {
    pub(crate) const fn table(self) -> &'static str {
        match self {
            Self::Subscriptions => "subscriptions",
            Self::Favourites => "favourites",
        }
    }
}

/// Outcome of adding a ledger row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerInsert {
    Inserted,
    /// The row already existed, e.g. written by a concurrent request.
    AlreadyPresent,
}

#[derive(Debug, Clone)]
pub struct NewMessage<'a> {
    pub broker_id: i64,
    pub user_id: Option<i64>,
    pub topic_id: Option<i64>,
    pub qos: u8,
    pub message: &'a str,
}

/// A history row with its topic and publisher resolved for display.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: i64,
    pub topic: Option<String>,
    pub client_id: Option<String>,
    pub outsider: Option<bool>,
    pub qos: i64,
    pub message: String,
    pub created_at: i64,
}
