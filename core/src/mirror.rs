//! Read-only occupancy view rebuilt from received events.
//!
//! A mirror knows only what it has heard. A listener that starts after
//! slots were occupied shows them as free until new events arrive.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_broker::{BrokerClient, BrokerError, Message, QoS};
use tokio::sync::watch;

use crate::catalog::SlotId;
use crate::event::{Occupancy, OccupancyChangeEvent, TOPIC_FILTER};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisplayMirror {
    occupied: BTreeSet<SlotId>,
    applied: u64,
}

impl DisplayMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one event. Returns whether the occupied set changed; freeing a
    /// slot the mirror never saw occupied is a no-op.
    pub fn apply(&mut self, event: &OccupancyChangeEvent) -> bool {
        self.applied += 1;
        match event.state {
            Occupancy::Occupied => self.occupied.insert(event.slot.clone()),
            Occupancy::Free => self.occupied.remove(&event.slot),
        }
    }

    pub fn is_occupied(&self, slot: &SlotId) -> bool {
        self.occupied.contains(slot)
    }

    pub fn occupied(&self) -> &BTreeSet<SlotId> {
        &self.occupied
    }

    /// Number of events applied so far, including no-ops.
    pub fn applied(&self) -> u64 {
        self.applied
    }
}

/// Keeps a [`DisplayMirror`] current from `parking/#` messages.
///
/// Clones share one mirror.
#[derive(Clone)]
pub struct DisplayListener {
    mirror: Arc<watch::Sender<DisplayMirror>>,
}

impl DisplayListener {
    pub fn new() -> Self {
        let (mirror, _) = watch::channel(DisplayMirror::new());
        Self {
            mirror: Arc::new(mirror),
        }
    }

    /// Create a listener and subscribe it on `client`.
    ///
    /// If the client is not connected yet the subscription goes out once it
    /// is.
    pub async fn attach(client: &BrokerClient) -> Result<Self, BrokerError> {
        let listener = Self::new();
        let handler = listener.clone();
        client
            .subscribe(TOPIC_FILTER, QoS::AtLeastOnce, move |message| {
                handler.handle(message);
            })
            .await?;
        Ok(listener)
    }

    /// Decode and apply one received message. Malformed messages are logged
    /// and dropped.
    pub fn handle(&self, message: &Message) {
        match OccupancyChangeEvent::from_message(message) {
            Ok(event) => {
                let changed = self.apply(&event);
                tracing::debug!(
                    slot = %event.slot,
                    floor = %event.floor,
                    state = %event.state,
                    changed,
                    "occupancy event applied"
                );
            }
            Err(err) => {
                tracing::warn!(topic = %message.topic, error = %err, "ignoring malformed occupancy message");
            }
        }
    }

    /// Apply `event` and notify watchers if the occupied set changed.
    pub fn apply(&self, event: &OccupancyChangeEvent) -> bool {
        let mut changed = false;
        self.mirror.send_if_modified(|mirror| {
            changed = mirror.apply(event);
            changed
        });
        changed
    }

    pub fn snapshot(&self) -> DisplayMirror {
        self.mirror.borrow().clone()
    }

    /// Receiver that wakes whenever the occupied set changes.
    pub fn watch(&self) -> watch::Receiver<DisplayMirror> {
        self.mirror.subscribe()
    }
}

impl Default for DisplayListener {
    fn default() -> Self {
        Self::new()
    }
}
