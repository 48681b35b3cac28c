//! brokerdesk Server Library
//!
//! Core functionality for the brokerdesk backend:
//! - SQLite storage for brokers, users, topics, ledgers and message history
//! - Live MQTT broker link with acknowledged requests
//! - Inbound message ingestion pipeline
//! - Subscription/favourite reconciliation against the live connection
//! - Session context and the HTTP API

pub mod api;
pub mod ingest;
pub mod link;
pub mod reconcile;
pub mod session;
pub mod storage;
