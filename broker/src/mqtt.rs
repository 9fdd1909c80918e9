//! MQTT 3.1.1 transport backed by `rumqttc`.
//!
//! Every session gets a fresh `rumqttc` event loop driven by its own task.
//! The task forwards incoming publishes and matches acknowledgments back to
//! waiting callers by packet id. When the event loop errors the task fails
//! every outstanding request with `Disconnected` and stops; the event loop is
//! dropped so nothing unconfirmed is replayed on the next session.
//!
//! Requests never wait for room in the client queue: a full queue fails the
//! request immediately with `PublishRejected` or `SubscribeFailed`.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet,
    SubscribeReasonCode,
};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::error::{BrokerError, Result};
use crate::options::{ConnectOptions, QoS};
use crate::transport::{Connection, Link, LinkEvent, Message, Transport};

/// Shortest keepalive the client accepts.
const MIN_KEEPALIVE: Duration = Duration::from_secs(5);

/// Opens MQTT sessions over TCP.
#[derive(Debug, Clone, Copy, Default)]
pub struct MqttTransport;

impl MqttTransport {
    pub fn new() -> Self {
        Self
    }
}

fn mqtt_options(options: &ConnectOptions) -> MqttOptions {
    let mut mqtt = MqttOptions::new(
        options.effective_client_id(),
        options.host.clone(),
        options.port,
    );
    mqtt.set_keep_alive(options.keepalive().max(MIN_KEEPALIVE));
    mqtt.set_clean_session(true);
    if let Some(creds) = &options.credentials {
        mqtt.set_credentials(creds.username.clone(), creds.password.clone());
    }
    mqtt
}

fn to_mqtt_qos(qos: QoS) -> rumqttc::QoS {
    match qos {
        QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
        QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
    }
}

async fn wait_for_connack(event_loop: &mut EventLoop, endpoint: &str) -> Result<()> {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if matches!(ack.code, ConnectReturnCode::Success) {
                    return Ok(());
                }
                return Err(BrokerError::Connection {
                    endpoint: endpoint.to_string(),
                    reason: format!("broker refused connection: {:?}", ack.code),
                });
            }
            Ok(_) => {}
            Err(err) => {
                return Err(BrokerError::Connection {
                    endpoint: endpoint.to_string(),
                    reason: err.to_string(),
                });
            }
        }
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn open(&self, options: &ConnectOptions) -> Result<Connection> {
        let endpoint = options.endpoint();
        let (client, mut event_loop) =
            AsyncClient::new(mqtt_options(options), options.request_capacity.max(1));
        wait_for_connack(&mut event_loop, &endpoint).await?;
        tracing::debug!(%endpoint, "mqtt session accepted");

        let (events, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(Mutex::new(Pending::default()));
        let closed = CancellationToken::new();
        tokio::spawn(drive(
            event_loop,
            events,
            Arc::clone(&pending),
            closed.clone(),
        ));

        let link = MqttLink {
            client,
            pending,
            closed,
        };
        Ok(Connection {
            link: Arc::new(link),
            events: rx,
        })
    }
}

struct Waiter {
    /// Topic or filter, for error reporting.
    key: String,
    qos: QoS,
    tx: oneshot::Sender<Result<()>>,
}

/// Requests waiting on the event loop.
///
/// Requests enter `unsent_*` in the order they are handed to the client and
/// move to the packet-id maps when the event loop reports them as written.
/// A waiter is only recorded once its request is in the client queue, and
/// both happen under the same lock.
#[derive(Default)]
struct Pending {
    /// Set once the event loop stopped; nothing new is accepted.
    closed: bool,
    unsent_publishes: VecDeque<Waiter>,
    unsent_subscribes: VecDeque<Waiter>,
    publishes: HashMap<u16, Waiter>,
    subscribes: HashMap<u16, Waiter>,
}

impl Pending {
    fn sent_publish(&mut self, pkid: u16) {
        let Some(waiter) = self.unsent_publishes.pop_front() else {
            return;
        };
        if waiter.qos == QoS::AtMostOnce {
            let _ = waiter.tx.send(Ok(()));
        } else {
            self.publishes.insert(pkid, waiter);
        }
    }

    fn sent_subscribe(&mut self, pkid: u16) {
        if let Some(waiter) = self.unsent_subscribes.pop_front() {
            self.subscribes.insert(pkid, waiter);
        }
    }

    fn confirm_publish(&mut self, pkid: u16) {
        if let Some(waiter) = self.publishes.remove(&pkid) {
            let _ = waiter.tx.send(Ok(()));
        }
    }

    fn confirm_subscribe(&mut self, pkid: u16, codes: &[SubscribeReasonCode]) {
        let Some(waiter) = self.subscribes.remove(&pkid) else {
            return;
        };
        let result = if codes
            .iter()
            .any(|code| matches!(code, SubscribeReasonCode::Failure))
        {
            Err(BrokerError::SubscribeFailed {
                filter: waiter.key.clone(),
                reason: "refused by broker".to_string(),
            })
        } else {
            Ok(())
        };
        let _ = waiter.tx.send(result);
    }

    fn fail_all(&mut self) {
        self.closed = true;
        let waiters = self
            .unsent_publishes
            .drain(..)
            .chain(self.unsent_subscribes.drain(..))
            .chain(self.publishes.drain().map(|(_, w)| w))
            .chain(self.subscribes.drain().map(|(_, w)| w));
        for waiter in waiters {
            let topic = waiter.key;
            let _ = waiter.tx.send(Err(BrokerError::Disconnected { topic }));
        }
    }
}

fn lock(pending: &Mutex<Pending>) -> MutexGuard<'_, Pending> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn drive(
    mut event_loop: EventLoop,
    events: mpsc::UnboundedSender<LinkEvent>,
    pending: Arc<Mutex<Pending>>,
    closed: CancellationToken,
) {
    let reason = loop {
        let polled = tokio::select! {
            _ = closed.cancelled() => break "closed by client".to_string(),
            polled = event_loop.poll() => polled,
        };
        match polled {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let _ = events.send(LinkEvent::Message(Message {
                    topic: publish.topic,
                    payload: publish.payload,
                }));
            }
            Ok(Event::Incoming(Packet::PubAck(ack))) => lock(&pending).confirm_publish(ack.pkid),
            Ok(Event::Incoming(Packet::PubComp(comp))) => {
                lock(&pending).confirm_publish(comp.pkid);
            }
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                lock(&pending).confirm_subscribe(ack.pkid, &ack.return_codes);
            }
            Ok(Event::Outgoing(Outgoing::Publish(pkid))) => lock(&pending).sent_publish(pkid),
            Ok(Event::Outgoing(Outgoing::Subscribe(pkid))) => {
                lock(&pending).sent_subscribe(pkid);
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => break "closed by client".to_string(),
            Ok(_) => {}
            Err(err) => break err.to_string(),
        }
    };

    lock(&pending).fail_all();
    tracing::debug!(%reason, "mqtt event loop stopped");
    let _ = events.send(LinkEvent::Closed { reason });
}

struct MqttLink {
    client: AsyncClient,
    pending: Arc<Mutex<Pending>>,
    closed: CancellationToken,
}

#[async_trait]
impl Link for MqttLink {
    async fn publish(&self, topic: &str, payload: Bytes, qos: QoS) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = lock(&self.pending);
            if pending.closed {
                return Err(BrokerError::Disconnected {
                    topic: topic.to_string(),
                });
            }
            let queued =
                self.client
                    .try_publish(topic, to_mqtt_qos(qos), false, payload.to_vec());
            if let Err(err) = queued {
                tracing::debug!(topic, error = %err, "mqtt request queue full");
                return Err(BrokerError::PublishRejected {
                    topic: topic.to_string(),
                    reason: "client request queue is full".to_string(),
                });
            }
            pending.unsent_publishes.push_back(Waiter {
                key: topic.to_string(),
                qos,
                tx,
            });
        }
        rx.await.unwrap_or_else(|_| {
            Err(BrokerError::Disconnected {
                topic: topic.to_string(),
            })
        })
    }

    async fn subscribe(&self, filter: &str, qos: QoS) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = lock(&self.pending);
            if pending.closed {
                return Err(BrokerError::Disconnected {
                    topic: filter.to_string(),
                });
            }
            if let Err(err) = self.client.try_subscribe(filter, to_mqtt_qos(qos)) {
                return Err(BrokerError::SubscribeFailed {
                    filter: filter.to_string(),
                    reason: err.to_string(),
                });
            }
            pending.unsent_subscribes.push_back(Waiter {
                key: filter.to_string(),
                qos,
                tx,
            });
        }
        rx.await.unwrap_or_else(|_| {
            Err(BrokerError::Disconnected {
                topic: filter.to_string(),
            })
        })
    }

    async fn close(&self) {
        if self.closed.is_cancelled() {
            return;
        }
        if self.client.try_disconnect().is_err() {
            self.closed.cancel();
        }
    }
}

impl Drop for MqttLink {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn waiter(key: &str, qos: QoS) -> (Waiter, oneshot::Receiver<Result<()>>) {
        let (tx, rx) = oneshot::channel();
        (
            Waiter {
                key: key.to_string(),
                qos,
                tx,
            },
            rx,
        )
    }

    #[test]
    fn acknowledgments_are_matched_by_packet_id() {
        let mut pending = Pending::default();
        let (first, mut first_rx) = waiter("parking/floor1/slot15", QoS::AtLeastOnce);
        let (second, mut second_rx) = waiter("parking/floor1/slot16", QoS::AtLeastOnce);
        pending.unsent_publishes.push_back(first);
        pending.unsent_publishes.push_back(second);

        pending.sent_publish(7);
        pending.sent_publish(8);
        pending.confirm_publish(8);

        assert_eq!(second_rx.try_recv(), Ok(Ok(())));
        assert!(first_rx.try_recv().is_err());
        assert_eq!(pending.publishes.len(), 1);
    }

    #[test]
    fn fire_and_forget_confirms_when_written() {
        let mut pending = Pending::default();
        let (w, mut rx) = waiter("parking/floor2/slot25", QoS::AtMostOnce);
        pending.unsent_publishes.push_back(w);
        pending.sent_publish(0);
        assert_eq!(rx.try_recv(), Ok(Ok(())));
        assert!(pending.publishes.is_empty());
    }

    #[test]
    fn lost_session_fails_every_waiter() {
        let mut pending = Pending::default();
        let (sent, mut sent_rx) = waiter("parking/floor1/slot10", QoS::AtLeastOnce);
        let (unsent, mut unsent_rx) = waiter("parking/floor1/slot11", QoS::AtLeastOnce);
        pending.unsent_publishes.push_back(sent);
        pending.sent_publish(1);
        pending.unsent_publishes.push_back(unsent);

        pending.fail_all();

        assert_eq!(
            sent_rx.try_recv(),
            Ok(Err(BrokerError::Disconnected {
                topic: "parking/floor1/slot10".to_string()
            }))
        );
        assert!(matches!(
            unsent_rx.try_recv(),
            Ok(Err(BrokerError::Disconnected { .. }))
        ));
    }

    fn offline_link(capacity: usize) -> (Arc<MqttLink>, EventLoop) {
        let (client, event_loop) =
            AsyncClient::new(MqttOptions::new("parking-test", "localhost", 1883), capacity);
        let link = MqttLink {
            client,
            pending: Arc::new(Mutex::new(Pending::default())),
            closed: CancellationToken::new(),
        };
        (Arc::new(link), event_loop)
    }

    #[tokio::test]
    async fn full_request_queue_keeps_acknowledgments_aligned() {
        let (link, mut event_loop) = offline_link(1);

        // Queued, then abandoned by a caller-side timeout.
        let abandoned = tokio::time::timeout(
            Duration::from_millis(20),
            link.publish(
                "parking/floor1/slot15",
                Bytes::from_static(b"occupied"),
                QoS::AtLeastOnce,
            ),
        )
        .await;
        assert!(abandoned.is_err());

        let overflow = tokio::time::timeout(
            Duration::from_millis(100),
            link.publish(
                "parking/floor1/slot16",
                Bytes::from_static(b"occupied"),
                QoS::AtLeastOnce,
            ),
        )
        .await;
        assert!(matches!(
            overflow,
            Ok(Err(BrokerError::PublishRejected { .. }))
        ));
        assert_eq!(lock(&link.pending).unsent_publishes.len(), 1);

        // The event loop takes the first request off the queue.
        event_loop.clean();
        let next = tokio::spawn({
            let link = Arc::clone(&link);
            async move {
                link.publish(
                    "parking/floor1/slot17",
                    Bytes::from_static(b"occupied"),
                    QoS::AtLeastOnce,
                )
                .await
            }
        });
        for _ in 0..100 {
            if lock(&link.pending).unsent_publishes.len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        {
            let mut pending = lock(&link.pending);
            pending.sent_publish(1);
            pending.sent_publish(2);
            pending.confirm_publish(2);
        }
        let result = tokio::time::timeout(Duration::from_secs(1), next)
            .await
            .unwrap_or_else(|e| panic!("{e}"))
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(result, Ok(()));
        assert_eq!(
            lock(&link.pending)
                .publishes
                .get(&1)
                .map(|w| w.key.as_str()),
            Some("parking/floor1/slot15")
        );
    }

    #[tokio::test]
    async fn stopped_event_loop_fails_new_requests() {
        let (link, _event_loop) = offline_link(4);
        lock(&link.pending).fail_all();

        let published = link
            .publish("parking/floor2/slot20", Bytes::new(), QoS::AtLeastOnce)
            .await;
        let subscribed = link.subscribe("parking/#", QoS::AtLeastOnce).await;

        assert!(matches!(published, Err(BrokerError::Disconnected { .. })));
        assert!(matches!(subscribed, Err(BrokerError::Disconnected { .. })));
        assert!(lock(&link.pending).unsent_publishes.is_empty());
    }

    #[test]
    fn refused_subscription_is_reported() {
        let mut pending = Pending::default();
        let (w, mut rx) = waiter("parking/#", QoS::AtLeastOnce);
        pending.unsent_subscribes.push_back(w);
        pending.sent_subscribe(3);
        pending.confirm_subscribe(3, &[SubscribeReasonCode::Failure]);
        assert!(matches!(
            rx.try_recv(),
            Ok(Err(BrokerError::SubscribeFailed { .. }))
        ));
    }
}
