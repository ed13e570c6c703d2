//! WebSocket relay state and broadcast.
//!
//! Every attached viewer holds its own `broadcast::Receiver`, so a slow viewer only
//! lags its own queue. Events emitted before a viewer attaches are never replayed.

use tokio::sync::broadcast;
use uuid::Uuid;

use shared::{
    ws_types, RelayMessage, WsConnectionStatusPayload, WsEnvelope, WsPublishProgressPayload,
    WsPublishResultPayload,
};

/// Message to broadcast to WebSocket clients.
#[derive(Debug, Clone)]
pub enum BroadcastMessage {
    ConnectionStatus(bool),
    ReceiveMessage(RelayMessage),
    PublishProgress(WsPublishProgressPayload),
    PublishResult(WsPublishResultPayload),
}

impl BroadcastMessage {
    /// Publish events addressed to one viewer are withheld from the others.
    pub fn is_for(&self, viewer: Uuid) -> bool {
        match self {
            Self::PublishProgress(p) => p.viewer_id.map_or(true, |v| v == viewer),
            Self::PublishResult(p) => p.viewer_id.map_or(true, |v| v == viewer),
            Self::ConnectionStatus(_) | Self::ReceiveMessage(_) => true,
        }
    }

    pub fn to_envelope(&self) -> serde_json::Result<WsEnvelope> {
        let (r#type, payload) = match self {
            Self::ConnectionStatus(connected) => (
                ws_types::CONNECTION_STATUS,
                serde_json::to_value(WsConnectionStatusPayload {
                    connected: *connected,
                })?,
            ),
            Self::ReceiveMessage(m) => (ws_types::RECEIVE_MESSAGE, serde_json::to_value(m)?),
            Self::PublishProgress(p) => (ws_types::PUBLISH_PROGRESS, serde_json::to_value(p)?),
            Self::PublishResult(p) => (ws_types::PUBLISH_RESULT, serde_json::to_value(p)?),
        };
        Ok(WsEnvelope::new(r#type, payload))
    }
}

/// Relay state: broadcast channel for WebSocket messages.
#[derive(Clone)]
pub struct RelayState {
    tx: broadcast::Sender<BroadcastMessage>,
}

impl RelayState {
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastMessage> {
        self.tx.subscribe()
    }

    pub fn broadcast(&self, msg: BroadcastMessage) {
        // No receivers is normal: nobody is watching yet.
        let _ = self.tx.send(msg);
    }

    /// Number of attached receivers (viewers plus internal consumers).
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new()
    }
}
