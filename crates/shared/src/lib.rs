//! Shared types, telemetry schemas and payload transforms for the MQTT relay.

mod models;
pub mod telemetry;
pub mod transform;

// Explicit re-exports (avoids rust-analyzer issues with `pub use models::*`)
pub use models::ws_types;
pub use models::{
    iso8601_now, BrokerConnection, BrokerStatusResponse, ConnectionState, PublishAccepted,
    PublishOutcome, PublishRequest, PublishResultEntry, PublishSeverity, RelayMessage,
    TopicRequest, WsConnectionStatusPayload, WsEnvelope, WsHelloPayload, WsPublishProgressPayload,
    WsPublishResultPayload, PREDEFINED_TOPICS,
};
pub use transform::{transform, Projection, TopicKind, TransformError, Transformed};
