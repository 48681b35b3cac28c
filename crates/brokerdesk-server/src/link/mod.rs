//! Live broker link.
//!
//! [`BrokerLink`] is the seam between the reconciliation engine and the MQTT
//! client: every request call returns only after the broker acknowledged it
//! (or the wait timed out). [`LinkConnector`] establishes links so the HTTP
//! layer never names the concrete client.

mod mqtt;
mod pending;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod fake;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

pub use mqtt::{MqttConnector, MqttLink};
pub use rumqttc::QoS;

/// Errors surfaced by link operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LinkError {
    /// The broker refused the CONNECT (bad credentials, client id, ...).
    #[error("connection refused: {0}")]
    Refused(String),

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("timed out waiting for the broker")]
    Timeout,

    /// The broker answered with a failure code, or the request is unsupported.
    #[error("rejected: {0}")]
    Rejected(String),

    #[error("connection lost before acknowledgement")]
    ConnectionLost,

    #[error("link is closed")]
    Closed,
}

/// Connection state as observed by the event loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    Connected,
    /// Network lost; the event loop is retrying with backoff.
    Reconnecting,
    Disconnected(String),
}

/// A PUBLISH received from the broker.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: u8,
    pub retained: bool,
}

/// Out-of-band notifications from the event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// A reconnect did not resume the previous session, so broker-side
    /// subscriptions are gone.
    SessionLost,
}

/// Coordinates and credentials for one broker connection.
#[derive(Debug, Clone)]
pub struct ConnectParams {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: String,
    pub password: String,
}

/// An established link.
pub struct Connected {
    pub link: Arc<dyn BrokerLink>,
    /// The broker resumed a previous session for this client id.
    pub session_present: bool,
}

/// Operations against the live broker connection.
#[async_trait]
pub trait BrokerLink: Send + Sync {
    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), LinkError>;

    async fn unsubscribe(&self, topic: &str) -> Result<(), LinkError>;

    async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), LinkError>;

    /// Send DISCONNECT and stop the event loop, waiting at most `grace`.
    async fn disconnect(&self, grace: Duration);

    fn state(&self) -> LinkState;

    /// Connected, or transparently reconnecting.
    fn is_connected(&self) -> bool {
        matches!(self.state(), LinkState::Connected | LinkState::Reconnecting)
    }

    /// The network connection is up right now.
    fn is_connection_open(&self) -> bool {
        self.state() == LinkState::Connected
    }
}

/// Establishes broker links.
#[async_trait]
pub trait LinkConnector: Send + Sync {
    /// Connect and start delivering inbound messages to `inbound` and
    /// lifecycle notifications to `events`.
    async fn connect(
        &self,
        params: ConnectParams,
        inbound: mpsc::Sender<InboundMessage>,
        events: mpsc::Sender<LinkEvent>,
    ) -> Result<Connected, LinkError>;
}

/// Map a wire QoS level onto the levels this service supports.
pub const fn qos_from_level(level: u8) -> Option<QoS> {
    match level {
        0 => Some(QoS::AtMostOnce),
        1 => Some(QoS::AtLeastOnce),
        _ => None,
    }
}

pub const fn qos_level(qos: QoS) -> u8 {
    match qos {
        QoS::AtMostOnce => 0,
        QoS::AtLeastOnce => 1,
        QoS::ExactlyOnce => 2,
    }
}
