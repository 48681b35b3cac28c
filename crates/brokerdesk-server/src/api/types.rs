//! Request and response bodies. All JSON keys are camelCase.

use serde::{Deserialize, Serialize};

use crate::storage::{LedgerEntry, MessageView, Topic};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

/// A port given either as a JSON number or as a numeric string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PortValue {
    Number(i64),
    Text(String),
}

impl PortValue {
    pub fn to_port(&self) -> Option<u16> {
        match self {
            Self::Number(n) => u16::try_from(*n).ok(),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialsRequest {
    pub ip: String,
    pub port: PortValue,
    pub client_id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialsResponse {
    pub message: String,
    pub broker_id: i64,
    pub user_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl PingResponse {
    pub fn status(status: &str) -> Self {
        Self {
            status: status.to_string(),
            ip: None,
            port: None,
            client_id: None,
            reason: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicsRequest {
    pub broker_id: i64,
    pub user_id: i64,
    pub topics: Vec<String>,
    /// Subscription QoS; ignored by the other batch endpoints.
    #[serde(default)]
    pub qos: Option<u8>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerUserQuery {
    pub broker_id: i64,
    pub user_id: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerQuery {
    pub broker_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicListResponse {
    pub topics: Vec<Topic>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerListResponse {
    pub topics: Vec<LedgerEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub broker_id: i64,
    pub user_id: i64,
    pub topic: String,
    pub message: String,
    #[serde(default)]
    pub qos: Option<u8>,
    #[serde(default)]
    pub retain: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesQuery {
    pub broker_id: i64,
    pub topic: String,
    #[serde(default)]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesResponse {
    pub topic: String,
    pub messages: Vec<MessageView>,
}
