//! Transport seam between [`crate::BrokerClient`] and a concrete pub/sub wire.
//!
//! A [`Transport`] opens sessions. Each open session is a [`Link`] (the send
//! side) plus a stream of [`LinkEvent`]s (the receive side). The client owns
//! timeouts, reconnects and handler dispatch; transports only move bytes and
//! report acknowledgments.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::options::{ConnectOptions, QoS};

/// One message received from, or sent to, the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub payload: Bytes,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// Payload as UTF-8 text, if it is valid UTF-8.
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

/// Something that happened on an open session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Message(Message),
    /// The session ended. No further events follow.
    Closed { reason: String },
}

/// A freshly opened session.
pub struct Connection {
    pub link: Arc<dyn Link>,
    pub events: mpsc::UnboundedReceiver<LinkEvent>,
}

/// Opens sessions to a broker.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a session and wait until the broker accepted it.
    async fn open(&self, options: &ConnectOptions) -> Result<Connection>;
}

/// Send side of one open session.
#[async_trait]
pub trait Link: Send + Sync {
    /// Publish and resolve once the requested guarantee is confirmed.
    ///
    /// Must fail with [`crate::BrokerError::Disconnected`] if the session
    /// ends before confirmation.
    async fn publish(&self, topic: &str, payload: Bytes, qos: QoS) -> Result<()>;

    /// Subscribe and resolve once the broker granted the subscription.
    async fn subscribe(&self, filter: &str, qos: QoS) -> Result<()>;

    /// Close the session. Idempotent.
    async fn close(&self);
}
