//! Inbound broker message handling: validate, transform, relay.

use std::sync::Arc;

use shared::{transform, RelayMessage};

use crate::relay::{BroadcastMessage, RelayState};

/// Why an inbound message was not relayed.
#[derive(Debug, PartialEq, Eq)]
pub enum Dropped {
    EmptyTopic,
    EmptyPayload,
    NotUtf8,
    Malformed,
}

/// Turns raw broker publishes into relay events. Never fails past this boundary.
#[derive(Clone)]
pub struct InboundHandler {
    relay: Arc<RelayState>,
}

impl InboundHandler {
    pub fn new(relay: Arc<RelayState>) -> Self {
        Self { relay }
    }

    pub fn handle(&self, topic: &str, payload: &[u8]) -> Result<(), Dropped> {
        if topic.is_empty() {
            tracing::warn!("dropping broker message with empty topic");
            return Err(Dropped::EmptyTopic);
        }
        if payload.is_empty() {
            tracing::warn!(topic = %topic, "dropping broker message with empty payload");
            return Err(Dropped::EmptyPayload);
        }
        let Ok(text) = std::str::from_utf8(payload) else {
            tracing::warn!(topic = %topic, bytes = payload.len(), "dropping non-UTF-8 payload");
            return Err(Dropped::NotUtf8);
        };
        match transform(topic, text) {
            Ok(transformed) => {
                self.relay
                    .broadcast(BroadcastMessage::ReceiveMessage(RelayMessage::new(
                        topic,
                        transformed.into_payload(),
                    )));
                Ok(())
            }
            Err(e) => {
                tracing::warn!(topic = %topic, error = %e, "dropping malformed payload");
                Err(Dropped::Malformed)
            }
        }
    }
}
