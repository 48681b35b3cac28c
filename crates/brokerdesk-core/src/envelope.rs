//! Self-describing payload envelope carried on the wire.
//!
//! Messages published through brokerdesk are wrapped as
//! `{"clientId": "...", "message": "..."}` so that subscribers can attribute
//! them to a publisher. Payloads from other publishers may be anything, so
//! decoding never fails: an undecodable payload becomes a raw body with no
//! known publisher.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Wire envelope wrapping a message body with its publisher's client id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub client_id: String,
    pub message: String,
}

/// Result of interpreting an inbound payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// The payload was a well-formed envelope.
    Decoded(Envelope),
    /// Anything else; the whole payload is the message body.
    ///
    /// History is stored as text, so invalid UTF-8 sequences are replaced
    /// with U+FFFD and the original bytes are not recoverable. Binary
    /// payloads are recorded, not preserved.
    Raw(String),
}

impl Envelope {
    pub fn new(client_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            message: message.into(),
        }
    }

    /// Serialize to the JSON bytes published on the wire.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

impl Payload {
    /// Interpret raw publish bytes, falling back to the raw body.
    pub fn decode(bytes: &[u8]) -> Self {
        match serde_json::from_slice::<Envelope>(bytes) {
            Ok(envelope) if !envelope.client_id.is_empty() => Self::Decoded(envelope),
            _ => Self::Raw(String::from_utf8_lossy(bytes).into_owned()),
        }
    }

    /// Publisher client id, if the payload named one.
    pub fn client_id(&self) -> Option<&str> {
        match self {
            Self::Decoded(envelope) => Some(&envelope.client_id),
            Self::Raw(_) => None,
        }
    }

    pub fn body(&self) -> &str {
        match self {
            Self::Decoded(envelope) => &envelope.message,
            Self::Raw(body) => body,
        }
    }

    pub fn into_body(self) -> String {
        match self {
            Self::Decoded(envelope) => envelope.message,
            Self::Raw(body) => body,
        }
    }
}
