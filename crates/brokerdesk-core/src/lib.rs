//! `brokerdesk` Core Library
//!
//! Shared functionality for `brokerdesk` components:
//! - Configuration resolution and hierarchy
//! - `SQLite` pool helpers and the `define_database!` macro
//! - Inbound envelope codec
//! - MQTT topic filter validation and matching
//! - Common error types

pub mod config;
pub mod db;
pub mod envelope;
pub mod error;
pub mod topic;
pub mod tracing_init;

pub use config::Config;
pub use envelope::{Envelope, Payload};
pub use error::{Error, Result};
