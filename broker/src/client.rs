//! `BrokerClient`: one resilient session to the pub/sub transport.
//!
//! The session is owned by a background task that delivers incoming
//! messages to subscription handlers one at a time and, when the transport
//! drops the session, reconnects with bounded backoff and re-sends every
//! registered subscription. Publishing never waits for a reconnect: while no
//! session is up it fails with [`BrokerError::NotConnected`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::{Mutex, RwLock, mpsc, watch};
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::backoff::reconnect_delays;
use crate::error::{BrokerError, Result};
use crate::options::{ConnectOptions, QoS};
use crate::topic;
use crate::transport::{Connection, Link, LinkEvent, Message, Transport};

/// Callback invoked once per message matching its subscription filter.
pub type MessageHandler = Arc<dyn Fn(&Message) + Send + Sync>;

/// Observable lifecycle of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// First connection attempt in progress.
    Connecting,
    Connected,
    /// Session lost; `attempt` failed reconnects so far.
    Reconnecting { attempt: u32 },
    /// Shut down by [`BrokerClient::disconnect`] or by dropping every handle.
    Closed,
}

struct Subscription {
    filter: String,
    qos: QoS,
    handler: MessageHandler,
}

struct Inner {
    options: ConnectOptions,
    transport: Arc<dyn Transport>,
    link: RwLock<Option<Arc<dyn Link>>>,
    subscriptions: Mutex<Vec<Subscription>>,
    state: watch::Sender<SessionState>,
    shutdown: CancellationToken,
}

/// Cloneable handle to one broker session.
///
/// The session task stops when [`BrokerClient::disconnect`] is called or the
/// last clone is dropped.
#[derive(Clone)]
pub struct BrokerClient {
    inner: Arc<Inner>,
    _shutdown_on_drop: Arc<DropGuard>,
}

impl BrokerClient {
    /// Connect and fail if the broker cannot be reached within the connect
    /// timeout. Later disconnects are handled by the reconnect loop.
    pub async fn connect(transport: Arc<dyn Transport>, options: ConnectOptions) -> Result<Self> {
        let inner = Inner::new(transport, options);
        let connection = inner.open_once().await?;
        tracing::info!(
            endpoint = %inner.options.endpoint(),
            "connected to broker"
        );
        inner.install(connection.link).await;
        Ok(Self::spawn(inner, Some(connection.events)))
    }

    /// Start without waiting for the broker; the session task keeps trying
    /// in the background until it connects.
    pub fn start(transport: Arc<dyn Transport>, options: ConnectOptions) -> Self {
        let inner = Inner::new(transport, options);
        Self::spawn(inner, None)
    }

    fn spawn(inner: Arc<Inner>, events: Option<mpsc::UnboundedReceiver<LinkEvent>>) -> Self {
        let guard = inner.shutdown.clone().drop_guard();
        tokio::spawn(run_session(Arc::clone(&inner), events));
        Self {
            inner,
            _shutdown_on_drop: Arc::new(guard),
        }
    }

    pub fn options(&self) -> &ConnectOptions {
        &self.inner.options
    }

    pub fn state(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// Watch session state changes.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Publish and wait for the confirmation `qos` asks for, bounded by the
    /// publish timeout.
    pub async fn publish(&self, topic: &str, payload: impl Into<Bytes>, qos: QoS) -> Result<()> {
        topic::validate_topic(topic)?;
        if self.inner.shutdown.is_cancelled() {
            return Err(BrokerError::Closed);
        }
        let link = self
            .inner
            .current_link()
            .await
            .ok_or(BrokerError::NotConnected)?;

        let timeout = self.inner.options.publish_timeout();
        match tokio::time::timeout(timeout, link.publish(topic, payload.into(), qos)).await {
            Ok(Ok(())) => {
                tracing::debug!(topic, ?qos, "publish confirmed");
                Ok(())
            }
            Ok(Err(err)) => {
                tracing::warn!(topic, error = %err, "publish failed");
                Err(err)
            }
            Err(_) => {
                tracing::warn!(topic, ?timeout, "publish not confirmed in time");
                Err(BrokerError::PublishTimeout {
                    topic: topic.to_string(),
                    timeout,
                })
            }
        }
    }

    /// Register `handler` for messages matching `filter`.
    ///
    /// While connected the subscription is sent immediately and a refusal is
    /// returned as [`BrokerError::SubscribeFailed`] with the handler removed
    /// again. While disconnected the handler is registered and the
    /// subscription goes out with the next successful connect. Every
    /// registered subscription is re-sent after each reconnect.
    pub async fn subscribe<F>(&self, filter: &str, qos: QoS, handler: F) -> Result<()>
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        topic::validate_filter(filter)?;
        if self.inner.shutdown.is_cancelled() {
            return Err(BrokerError::Closed);
        }

        // Registered before the link is looked up: a session installed in
        // between replays it, otherwise the lookup below sees that session.
        let handler: MessageHandler = Arc::new(handler);
        self.inner.subscriptions.lock().await.push(Subscription {
            filter: filter.to_string(),
            qos,
            handler: Arc::clone(&handler),
        });

        let Some(link) = self.inner.current_link().await else {
            tracing::debug!(filter, "not connected, subscription deferred");
            return Ok(());
        };
        if let Err(err) = self.inner.send_subscribe(link.as_ref(), filter, qos).await {
            self.inner
                .subscriptions
                .lock()
                .await
                .retain(|s| !Arc::ptr_eq(&s.handler, &handler));
            return Err(err);
        }
        tracing::info!(filter, "subscribed");
        Ok(())
    }

    /// Close the session and stop reconnecting.
    pub async fn disconnect(&self) {
        self.inner.shutdown.cancel();
        if let Some(link) = self.inner.link.write().await.take() {
            link.close().await;
        }
        self.inner.state.send_replace(SessionState::Closed);
        tracing::info!(endpoint = %self.inner.options.endpoint(), "broker session closed");
    }
}

impl Inner {
    fn new(transport: Arc<dyn Transport>, options: ConnectOptions) -> Arc<Self> {
        let (state, _) = watch::channel(SessionState::Connecting);
        Arc::new(Self {
            options,
            transport,
            link: RwLock::new(None),
            subscriptions: Mutex::new(Vec::new()),
            state,
            shutdown: CancellationToken::new(),
        })
    }

    async fn current_link(&self) -> Option<Arc<dyn Link>> {
        self.link.read().await.clone()
    }

    async fn open_once(&self) -> Result<Connection> {
        let timeout = self.options.connect_timeout();
        match tokio::time::timeout(timeout, self.transport.open(&self.options)).await {
            Ok(result) => result,
            Err(_) => Err(BrokerError::Connection {
                endpoint: self.options.endpoint(),
                reason: format!("no answer within {timeout:?}"),
            }),
        }
    }

    async fn send_subscribe(&self, link: &dyn Link, filter: &str, qos: QoS) -> Result<()> {
        let timeout = self.options.connect_timeout();
        match tokio::time::timeout(timeout, link.subscribe(filter, qos)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(BrokerError::SubscribeFailed { filter, reason })) => {
                Err(BrokerError::SubscribeFailed { filter, reason })
            }
            Ok(Err(err)) => Err(BrokerError::SubscribeFailed {
                filter: filter.to_string(),
                reason: err.to_string(),
            }),
            Err(_) => Err(BrokerError::SubscribeFailed {
                filter: filter.to_string(),
                reason: format!("not acknowledged within {timeout:?}"),
            }),
        }
    }

    /// Make `link` the live session and replay registered subscriptions.
    /// The state flips to `Connected` only once the replay is done.
    async fn install(&self, link: Arc<dyn Link>) {
        *self.link.write().await = Some(Arc::clone(&link));

        let filters: Vec<(String, QoS)> = self
            .subscriptions
            .lock()
            .await
            .iter()
            .map(|s| (s.filter.clone(), s.qos))
            .collect();
        for (filter, qos) in filters {
            match self.send_subscribe(link.as_ref(), &filter, qos).await {
                Ok(()) => tracing::info!(filter = %filter, "subscribed"),
                Err(err) => tracing::warn!(filter = %filter, error = %err, "resubscribe failed"),
            }
        }
        self.state.send_replace(SessionState::Connected);
    }

    async fn uninstall(&self) {
        if let Some(link) = self.link.write().await.take() {
            link.close().await;
        }
    }

    /// Deliver messages until the session ends. Returns the reason it ended,
    /// or `None` on shutdown.
    async fn pump(&self, events: &mut mpsc::UnboundedReceiver<LinkEvent>) -> Option<String> {
        loop {
            let event = tokio::select! {
                _ = self.shutdown.cancelled() => return None,
                event = events.recv() => event,
            };
            match event {
                Some(LinkEvent::Message(message)) => self.dispatch(&message).await,
                Some(LinkEvent::Closed { reason }) => return Some(reason),
                None => return Some("transport stopped".to_string()),
            }
        }
    }

    async fn dispatch(&self, message: &Message) {
        let handlers: Vec<MessageHandler> = self
            .subscriptions
            .lock()
            .await
            .iter()
            .filter(|s| topic::matches(&s.filter, &message.topic))
            .map(|s| Arc::clone(&s.handler))
            .collect();
        if handlers.is_empty() {
            tracing::trace!(topic = %message.topic, "no handler for message");
        }
        for handler in handlers {
            handler(message);
        }
    }

    /// Wait out `delay` unless shut down first. `false` on shutdown.
    async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = self.shutdown.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    fn next_delay(&self, delays: &mut impl Iterator<Item = Duration>) -> Duration {
        delays
            .next()
            .unwrap_or_else(|| self.options.reconnect.max_delay())
    }

    /// Retry until a session opens. `None` on shutdown.
    async fn reconnect(
        &self,
        delays: &mut (impl Iterator<Item = Duration> + Send),
    ) -> Option<Connection> {
        let mut attempt: u32 = 0;
        loop {
            if self.shutdown.is_cancelled() {
                return None;
            }
            match self.open_once().await {
                Ok(connection) => {
                    tracing::info!(
                        endpoint = %self.options.endpoint(),
                        attempt,
                        "reconnected to broker"
                    );
                    return Some(connection);
                }
                Err(err) => {
                    attempt = attempt.saturating_add(1);
                    self.state
                        .send_replace(SessionState::Reconnecting { attempt });
                    let delay = self.next_delay(delays);
                    tracing::warn!(
                        error = %err,
                        attempt,
                        ?delay,
                        "broker unreachable, retrying"
                    );
                    if !self.pause(delay).await {
                        return None;
                    }
                }
            }
        }
    }
}

/// Body of the session task.
///
/// One delay schedule spans every outage, so a broker that accepts and then
/// drops sessions is retried with growing delays too. The schedule starts
/// over once a session has stayed up for the longest delay.
async fn run_session(inner: Arc<Inner>, mut events: Option<mpsc::UnboundedReceiver<LinkEvent>>) {
    let policy = inner.options.reconnect.clone();
    let mut delays = reconnect_delays(&policy);
    loop {
        let mut rx = match events.take() {
            Some(rx) => rx,
            None => match inner.reconnect(&mut delays).await {
                Some(connection) => {
                    inner.install(connection.link).await;
                    connection.events
                }
                None => break,
            },
        };

        let opened = Instant::now();
        let ended = inner.pump(&mut rx).await;
        inner.uninstall().await;
        let Some(reason) = ended else {
            break;
        };

        let uptime = opened.elapsed();
        if uptime >= policy.max_delay() {
            delays = reconnect_delays(&policy);
        }
        let delay = inner.next_delay(&mut delays);
        tracing::warn!(
            reason = %reason,
            ?uptime,
            ?delay,
            "broker session lost, reconnecting"
        );
        inner
            .state
            .send_replace(SessionState::Reconnecting { attempt: 0 });
        if !inner.pause(delay).await {
            break;
        }
    }
    inner.state.send_replace(SessionState::Closed);
}
