//! Shared request/response and domain models.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Recognised topic names that the viewer offers for one-click subscription.
pub const PREDEFINED_TOPICS: [&str; 4] = ["visualization", "state", "order", "instantActions"];

/// Broker connection parameters. One live connection per relayer instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerConnection {
    pub host: String,
    pub port: i32,
    pub client_id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl BrokerConnection {
    /// Check the parameters before any network call. Returns the port as `u16`.
    pub fn validate(&self) -> Result<u16, String> {
        if self.host.trim().is_empty() {
            return Err("host must not be empty".to_string());
        }
        if self.port <= 0 || self.port > i32::from(u16::MAX) {
            return Err(format!("port {} is out of range", self.port));
        }
        if self.client_id.trim().is_empty() {
            return Err("client id must not be empty".to_string());
        }
        Ok(self.port as u16)
    }
}

/// Broker session state machine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
        }
    }
}

/// A transformed broker message on its way to viewers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayMessage {
    pub topic: String,
    pub payload: String,
    pub timestamp: String,
}

impl RelayMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            timestamp: iso8601_now(),
        }
    }
}

/// UTC timestamp with millisecond precision.
pub fn iso8601_now() -> String {
    chrono::Utc::now()
        .format("%Y-%m-%dT%H:%M:%S%.3fZ")
        .to_string()
}

// --- HTTP DTOs ---

/// Subscribe / unsubscribe request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicRequest {
    pub topic: String,
}

/// Broker status response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerStatusResponse {
    pub state: ConnectionState,
    pub connected: bool,
    pub client_id: Option<String>,
    pub subscriptions: Vec<String>,
}

/// Publish request (operator-authored payload).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishRequest {
    pub topic: String,
    pub payload: String,
    /// Viewer session that should receive progress events; all viewers when absent.
    #[serde(default)]
    pub viewer_id: Option<Uuid>,
}

/// Publish accepted response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishAccepted {
    pub job_id: Uuid,
    pub items: usize,
}

/// Outcome of one publish item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishOutcome {
    /// 1-based position of the item in the submitted payload.
    pub position: usize,
    pub success: bool,
    pub message: String,
}

/// Overall publish job severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishSeverity {
    Success,
    PartialFailure,
}

/// Persisted publish result row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishResultEntry {
    pub id: i64,
    pub job_id: Uuid,
    pub topic: String,
    pub success: bool,
    pub message: String,
    pub timestamp: String,
}

// --- WebSocket envelope ---

/// WebSocket message envelope (version 1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsEnvelope {
    #[serde(default)]
    pub version: u8,
    pub r#type: String,
    pub payload: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ts: Option<String>,
}

impl WsEnvelope {
    pub fn new(r#type: &str, payload: serde_json::Value) -> Self {
        Self {
            version: 1,
            r#type: r#type.to_string(),
            payload,
            ts: Some(iso8601_now()),
        }
    }
}

/// WebSocket message types.
pub mod ws_types {
    pub const HELLO: &str = "hello";
    pub const CONNECTION_STATUS: &str = "connection_status";
    pub const RECEIVE_MESSAGE: &str = "receive_message";
    pub const PUBLISH_PROGRESS: &str = "publish_progress";
    pub const PUBLISH_RESULT: &str = "publish_result";
    pub const PING: &str = "ping";
    pub const PONG: &str = "pong";
    pub const ERROR: &str = "error";
}

/// hello payload, sent once when a viewer attaches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsHelloPayload {
    pub session_id: Uuid,
    pub connected: bool,
}

/// connection_status payload.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WsConnectionStatusPayload {
    pub connected: bool,
}

/// publish_progress payload, emitted after each item completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsPublishProgressPayload {
    pub job_id: Uuid,
    #[serde(default)]
    pub viewer_id: Option<Uuid>,
    pub topic: String,
    pub outcome: PublishOutcome,
    pub completed: usize,
    pub total: usize,
    pub progress: f64,
}

/// publish_result payload, emitted once per job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsPublishResultPayload {
    pub job_id: Uuid,
    #[serde(default)]
    pub viewer_id: Option<Uuid>,
    pub topic: String,
    pub succeeded: usize,
    pub failed: usize,
    pub total: usize,
    pub severity: PublishSeverity,
}
