//! Broker session errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    /// Connection parameters rejected before any network call.
    #[error("invalid broker configuration: {0}")]
    InvalidConfig(String),

    /// Transport or authentication failure while connecting.
    #[error("failed to connect to broker: {0}")]
    ConnectFailed(String),

    #[error("timed out connecting to broker after {0}s")]
    ConnectTimeout(u64),

    #[error("not connected to a broker")]
    NotConnected,

    #[error("subscription change for '{topic}' failed: {reason}")]
    Subscription { topic: String, reason: String },

    #[error("publish to '{topic}' failed: {reason}")]
    Publish { topic: String, reason: String },
}
