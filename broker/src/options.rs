//! Session options: endpoint, credentials, timeouts and reconnect policy.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Delivery guarantee requested for a publish or subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QoS {
    /// Fire and forget; confirmed once handed to the network.
    AtMostOnce,
    /// Confirmed by the broker's acknowledgment.
    #[default]
    AtLeastOnce,
    /// Confirmed once the four-way handshake completes.
    ExactlyOnce,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Bounded exponential backoff used by the background reconnect loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// First delay after a lost session.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Upper bound for any single delay.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Growth factor between consecutive delays.
    #[serde(default = "default_factor")]
    pub factor: f32,

    /// Randomize delays so several displays don't reconnect in lockstep.
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl ReconnectPolicy {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            factor: default_factor(),
            jitter: default_true(),
        }
    }
}

/// Everything needed to open (and reopen) one broker session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectOptions {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// MQTT client identifier. Generated from the process id when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,

    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,

    #[serde(default = "default_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_timeout_ms")]
    pub publish_timeout_ms: u64,

    /// Capacity of the outgoing request queue of the MQTT transport.
    #[serde(default = "default_request_capacity")]
    pub request_capacity: usize,

    #[serde(default)]
    pub reconnect: ReconnectPolicy,
}

impl ConnectOptions {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }

    /// Client id to present to the broker.
    pub fn effective_client_id(&self) -> String {
        self.client_id
            .clone()
            .unwrap_or_else(|| format!("parking-{}", std::process::id()))
    }
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            client_id: None,
            credentials: None,
            keepalive_secs: default_keepalive_secs(),
            connect_timeout_ms: default_timeout_ms(),
            publish_timeout_ms: default_timeout_ms(),
            request_capacity: default_request_capacity(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}
fn default_port() -> u16 {
    1883
}
fn default_keepalive_secs() -> u64 {
    60
}
fn default_timeout_ms() -> u64 {
    5_000
}
fn default_request_capacity() -> usize {
    32
}
fn default_initial_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    30_000
}
fn default_factor() -> f32 {
    2.0
}
fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_match_a_local_broker() {
        let options = ConnectOptions::default();
        assert_eq!(options.endpoint(), "localhost:1883");
        assert_eq!(options.keepalive(), Duration::from_secs(60));
        assert_eq!(options.publish_timeout(), Duration::from_secs(5));
        assert_eq!(options.reconnect.initial_delay(), Duration::from_millis(500));
        assert_eq!(options.reconnect.max_delay(), Duration::from_secs(30));
    }

    #[test]
    fn explicit_client_id_wins() {
        let options = ConnectOptions {
            client_id: Some("manager-1".to_string()),
            ..ConnectOptions::default()
        };
        assert_eq!(options.effective_client_id(), "manager-1");
        assert!(
            ConnectOptions::default()
                .effective_client_id()
                .starts_with("parking-")
        );
    }

    #[test]
    fn credentials_debug_hides_password() {
        let creds = Credentials {
            username: "gate".to_string(),
            password: "hunter2".to_string(),
        };
        let rendered = format!("{creds:?}");
        assert!(rendered.contains("gate"));
        assert!(!rendered.contains("hunter2"));
    }
}
