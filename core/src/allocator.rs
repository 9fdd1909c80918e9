//! Slot allocation: the single writer of occupancy.
//!
//! Every state change is published first and committed to the store only
//! after the broker confirmed it. The store lock is held across the whole
//! read → decide → publish → commit sequence, so concurrent callers observe
//! each other's commits and never receive the same slot.

use std::sync::Arc;

use async_trait::async_trait;
use parking_broker::{BrokerClient, BrokerError, QoS};
use tokio::sync::Mutex;

use crate::catalog::{Availability, FloorId, SlotCatalog, SlotId, VehicleCategory};
use crate::error::{AllocationError, ReleaseError};
use crate::event::{Occupancy, OccupancyChangeEvent};
use crate::store::OccupancyStore;

/// Where the allocator sends occupancy changes.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Resolve once delivery of `event` is confirmed.
    async fn publish_event(&self, event: &OccupancyChangeEvent) -> Result<(), BrokerError>;
}

#[async_trait]
impl EventPublisher for BrokerClient {
    async fn publish_event(&self, event: &OccupancyChangeEvent) -> Result<(), BrokerError> {
        self.publish(&event.topic(), event.payload(), QoS::AtLeastOnce)
            .await
    }
}

pub struct Allocator {
    catalog: Arc<SlotCatalog>,
    publisher: Arc<dyn EventPublisher>,
    store: Mutex<OccupancyStore>,
}

fn first_free(
    catalog: &SlotCatalog,
    store: &OccupancyStore,
    category: &VehicleCategory,
) -> Option<(SlotId, FloorId)> {
    catalog
        .slots_for(category)?
        .find(|(_, slot)| !store.is_occupied(slot))
        .map(|(floor, slot)| (slot.clone(), floor.clone()))
}

impl Allocator {
    pub fn new(catalog: Arc<SlotCatalog>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            catalog,
            publisher,
            store: Mutex::new(OccupancyStore::new()),
        }
    }

    pub fn catalog(&self) -> &SlotCatalog {
        &self.catalog
    }

    /// First free slot of `category`: floors in catalog order, then slots in
    /// catalog order. `None` for an unknown category or a full one.
    pub async fn find_free_slot(&self, category: &VehicleCategory) -> Option<(SlotId, FloorId)> {
        let store = self.store.lock().await;
        first_free(&self.catalog, &store, category)
    }

    /// Take the first free slot of `category`.
    pub async fn occupy(
        &self,
        category: &VehicleCategory,
    ) -> Result<(SlotId, FloorId), AllocationError> {
        let mut store = self.store.lock().await;
        if !self.catalog.contains_category(category) {
            return Err(AllocationError::UnknownCategory(category.clone()));
        }
        let (slot, floor) = first_free(&self.catalog, &store, category)
            .ok_or_else(|| AllocationError::NoFreeSlot(category.clone()))?;

        let event = OccupancyChangeEvent::new(slot.clone(), floor.clone(), Occupancy::Occupied);
        if let Err(source) = self.publisher.publish_event(&event).await {
            tracing::warn!(%category, %slot, %floor, error = %source, "occupy not committed");
            return Err(AllocationError::PublishFailed { slot, floor, source });
        }

        store.occupy(slot.clone());
        tracing::info!(%category, %slot, %floor, "slot occupied");
        Ok((slot, floor))
    }

    /// Free `slot` of `category`. Returns the floor the slot is on.
    pub async fn release(
        &self,
        category: &VehicleCategory,
        slot: &SlotId,
    ) -> Result<FloorId, ReleaseError> {
        let mut store = self.store.lock().await;
        if !self.catalog.contains_category(category) {
            return Err(ReleaseError::UnknownCategory(category.clone()));
        }
        let floor = self
            .catalog
            .floor_in_category(category, slot)
            .cloned()
            .ok_or_else(|| ReleaseError::SlotNotInCategory {
                category: category.clone(),
                slot: slot.clone(),
            })?;
        if !store.is_occupied(slot) {
            return Err(ReleaseError::SlotNotOccupied(slot.clone()));
        }

        let event = OccupancyChangeEvent::new(slot.clone(), floor.clone(), Occupancy::Free);
        if let Err(source) = self.publisher.publish_event(&event).await {
            tracing::warn!(%category, %slot, %floor, error = %source, "release not committed");
            return Err(ReleaseError::PublishFailed {
                slot: slot.clone(),
                floor,
                source,
            });
        }

        store.release(slot);
        tracing::info!(%category, %slot, %floor, "slot released");
        Ok(floor)
    }

    /// Occupied slots, sorted.
    pub async fn occupied(&self) -> Vec<SlotId> {
        self.store.lock().await.as_set().iter().cloned().collect()
    }

    pub async fn is_occupied(&self, slot: &SlotId) -> bool {
        self.store.lock().await.is_occupied(slot)
    }

    pub async fn availability(&self) -> Vec<Availability> {
        let store = self.store.lock().await;
        self.catalog.availability(store.as_set())
    }

    pub async fn snapshot(&self) -> OccupancyStore {
        self.store.lock().await.clone()
    }
}
