//! `parking-broker`: resilient pub/sub session for the parking services.
//!
//! Wraps a publish/subscribe transport behind [`BrokerClient`]: connect,
//! acknowledged publish, subscribe with serialized handler delivery, and a
//! background reconnect loop with bounded exponential backoff.
//!
//! Two transports ship with the crate:
//! - [`mqtt::MqttTransport`] talks MQTT 3.1.1 to a real broker.
//! - [`memory::MemoryBroker`] is an in-process loopback broker with fault
//!   injection, used by tests across the workspace.

mod backoff;
pub mod client;
pub mod error;
pub mod memory;
pub mod mqtt;
pub mod options;
pub mod topic;
pub mod transport;

pub use client::{BrokerClient, MessageHandler, SessionState};
pub use error::{BrokerError, Result};
pub use options::{ConnectOptions, Credentials, QoS, ReconnectPolicy};
pub use transport::{Connection, Link, LinkEvent, Message, Transport};
