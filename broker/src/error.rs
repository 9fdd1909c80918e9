//! Error taxonomy for broker sessions.

use std::time::Duration;

/// Broker result type alias
pub type Result<T> = std::result::Result<T, BrokerError>;

/// Failures surfaced by [`crate::BrokerClient`] and the transports.
///
/// Publish outcomes are deliberately split: `PublishRejected` is a definite
/// failure, `PublishTimeout` is an unknown outcome, `Disconnected` means the
/// session dropped while the message was in flight.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    #[error("failed to connect to {endpoint}: {reason}")]
    Connection { endpoint: String, reason: String },

    #[error("not connected to broker")]
    NotConnected,

    #[error("publish to {topic} rejected: {reason}")]
    PublishRejected { topic: String, reason: String },

    #[error("publish to {topic} not confirmed within {timeout:?}")]
    PublishTimeout { topic: String, timeout: Duration },

    #[error("session dropped while waiting on {topic}")]
    Disconnected { topic: String },

    #[error("subscribe to {filter} failed: {reason}")]
    SubscribeFailed { filter: String, reason: String },

    #[error("invalid topic {topic:?}: {reason}")]
    InvalidTopic { topic: String, reason: String },

    #[error("broker client closed")]
    Closed,
}

impl BrokerError {
    /// True when the failure happened because no session existed at call time.
    pub fn is_not_connected(&self) -> bool {
        matches!(self, BrokerError::NotConnected)
    }

    /// True when the publish outcome is unknown rather than refused.
    pub fn is_timeout(&self) -> bool {
        matches!(self, BrokerError::PublishTimeout { .. })
    }
}
