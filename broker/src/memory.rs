//! In-process loopback broker.
//!
//! Routes messages between sessions opened in the same process and lets
//! tests inject faults: refused connections, rejected or stalled publishes,
//! refused or stalled subscriptions, and broker-side session drops.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{BrokerError, Result};
use crate::options::{ConnectOptions, QoS};
use crate::topic;
use crate::transport::{Connection, Link, LinkEvent, Message, Transport};

/// Shared handle to one in-process broker. Clones refer to the same broker.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

#[derive(Default)]
struct BrokerState {
    next_session: u64,
    sessions: HashMap<u64, Session>,
    offline: bool,
    refuse_connections: usize,
    reject_publishes: usize,
    reject_subscribes: usize,
    stall_publishes: bool,
    stall_subscribes: bool,
    accepted_connections: usize,
    published: Vec<Message>,
}

struct Session {
    client_id: String,
    events: mpsc::UnboundedSender<LinkEvent>,
    filters: Vec<String>,
    closed: CancellationToken,
}

impl BrokerState {
    fn route(&mut self, message: Message) {
        for session in self.sessions.values() {
            if session
                .filters
                .iter()
                .any(|filter| topic::matches(filter, &message.topic))
            {
                let _ = session.events.send(LinkEvent::Message(message.clone()));
            }
        }
        self.published.push(message);
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Refuse every new connection while `offline` is true.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    pub fn refuse_next_connections(&self, count: usize) {
        self.lock().refuse_connections = count;
    }

    pub fn reject_next_publishes(&self, count: usize) {
        self.lock().reject_publishes = count;
    }

    pub fn reject_next_subscribes(&self, count: usize) {
        self.lock().reject_subscribes = count;
    }

    /// Hold publishes unconfirmed until disabled again or the session drops.
    ///
    /// Publishes already stalled stay stalled.
    pub fn stall_publishes(&self, stall: bool) {
        self.lock().stall_publishes = stall;
    }

    /// Leave new subscriptions unacknowledged until disabled or the session
    /// drops.
    pub fn stall_subscribes(&self, stall: bool) {
        self.lock().stall_subscribes = stall;
    }

    /// Drop every open session as if the broker restarted.
    pub fn drop_sessions(&self) {
        let sessions: Vec<Session> = self.lock().sessions.drain().map(|(_, s)| s).collect();
        for session in sessions {
            tracing::debug!(client_id = %session.client_id, "memory broker dropping session");
            session.closed.cancel();
            let _ = session.events.send(LinkEvent::Closed {
                reason: "session dropped by broker".to_string(),
            });
        }
    }

    /// Deliver `message` to matching subscribers as if another client sent it.
    pub fn inject(&self, message: Message) {
        self.lock().route(message);
    }

    pub fn session_count(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn accepted_connections(&self) -> usize {
        self.lock().accepted_connections
    }

    /// Every message the broker accepted, in acceptance order.
    pub fn published(&self) -> Vec<Message> {
        self.lock().published.clone()
    }
}

#[async_trait]
impl Transport for MemoryBroker {
    async fn open(&self, options: &ConnectOptions) -> Result<Connection> {
        let mut state = self.lock();
        let refusal = if state.offline {
            Some("broker offline")
        } else if state.refuse_connections > 0 {
            state.refuse_connections -= 1;
            Some("connection refused")
        } else {
            None
        };
        if let Some(reason) = refusal {
            return Err(BrokerError::Connection {
                endpoint: options.endpoint(),
                reason: reason.to_string(),
            });
        }

        let (events, rx) = mpsc::unbounded_channel();
        let id = state.next_session;
        state.next_session += 1;
        state.accepted_connections += 1;
        let closed = CancellationToken::new();
        state.sessions.insert(
            id,
            Session {
                client_id: options.effective_client_id(),
                events,
                filters: Vec::new(),
                closed: closed.clone(),
            },
        );

        let link = MemoryLink {
            broker: self.clone(),
            session: id,
            closed,
        };
        Ok(Connection {
            link: Arc::new(link),
            events: rx,
        })
    }
}

struct MemoryLink {
    broker: MemoryBroker,
    session: u64,
    closed: CancellationToken,
}

#[async_trait]
impl Link for MemoryLink {
    async fn publish(&self, topic: &str, payload: Bytes, _qos: QoS) -> Result<()> {
        let stalled = {
            let mut state = self.broker.lock();
            if !state.sessions.contains_key(&self.session) {
                return Err(BrokerError::Disconnected {
                    topic: topic.to_string(),
                });
            }
            if state.reject_publishes > 0 {
                state.reject_publishes -= 1;
                return Err(BrokerError::PublishRejected {
                    topic: topic.to_string(),
                    reason: "rejected by broker".to_string(),
                });
            }
            if state.stall_publishes {
                true
            } else {
                state.route(Message::new(topic, payload));
                false
            }
        };

        if stalled {
            self.closed.cancelled().await;
            return Err(BrokerError::Disconnected {
                topic: topic.to_string(),
            });
        }
        Ok(())
    }

    async fn subscribe(&self, filter: &str, _qos: QoS) -> Result<()> {
        let stalled = {
            let mut state = self.broker.lock();
            if state.reject_subscribes > 0 {
                state.reject_subscribes -= 1;
                return Err(BrokerError::SubscribeFailed {
                    filter: filter.to_string(),
                    reason: "refused by broker".to_string(),
                });
            }
            let stalled = state.stall_subscribes;
            let Some(session) = state.sessions.get_mut(&self.session) else {
                return Err(BrokerError::Disconnected {
                    topic: filter.to_string(),
                });
            };
            if !stalled && !session.filters.iter().any(|f| f == filter) {
                session.filters.push(filter.to_string());
            }
            stalled
        };

        if stalled {
            self.closed.cancelled().await;
            return Err(BrokerError::Disconnected {
                topic: filter.to_string(),
            });
        }
        Ok(())
    }

    async fn close(&self) {
        if let Some(session) = self.broker.lock().sessions.remove(&self.session) {
            session.closed.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn routes_to_matching_sessions_only() {
        let broker = MemoryBroker::new();
        let options = ConnectOptions::default();
        let mut floor1 = broker.open(&options).await.unwrap_or_else(|e| panic!("{e}"));
        let mut other = broker.open(&options).await.unwrap_or_else(|e| panic!("{e}"));

        floor1
            .link
            .subscribe("parking/floor1/#", QoS::AtLeastOnce)
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        other
            .link
            .subscribe("garage/#", QoS::AtLeastOnce)
            .await
            .unwrap_or_else(|e| panic!("{e}"));

        other
            .link
            .publish(
                "parking/floor1/slot16",
                Bytes::from_static(b"occupied"),
                QoS::AtLeastOnce,
            )
            .await
            .unwrap_or_else(|e| panic!("{e}"));

        assert_eq!(
            floor1.events.recv().await,
            Some(LinkEvent::Message(Message::new(
                "parking/floor1/slot16",
                "occupied"
            )))
        );
        assert!(other.events.try_recv().is_err());
        assert_eq!(broker.published().len(), 1);
    }

    #[tokio::test]
    async fn offline_broker_refuses_connections() {
        let broker = MemoryBroker::new();
        broker.set_offline(true);
        let result = broker.open(&ConnectOptions::default()).await;
        assert!(matches!(result, Err(BrokerError::Connection { .. })));
        assert_eq!(broker.accepted_connections(), 0);
    }

    #[tokio::test]
    async fn dropped_session_reports_closed() {
        let broker = MemoryBroker::new();
        let mut connection = broker
            .open(&ConnectOptions::default())
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        broker.drop_sessions();

        assert!(matches!(
            connection.events.recv().await,
            Some(LinkEvent::Closed { .. })
        ));
        let result = connection
            .link
            .publish("parking/floor1/slot10", Bytes::new(), QoS::AtLeastOnce)
            .await;
        assert!(matches!(result, Err(BrokerError::Disconnected { .. })));
    }
}
