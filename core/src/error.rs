//! Error types for catalog construction, event decoding and allocation.
//!
//! Every allocator failure leaves the occupancy store exactly as it was
//! before the call.

use parking_broker::BrokerError;

use crate::catalog::{FloorId, SlotId, VehicleCategory};

/// Rejected catalog layouts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    #[error("category {0} declared twice")]
    DuplicateCategory(VehicleCategory),

    #[error("floor {floor} declared twice in category {category}")]
    DuplicateFloor {
        category: VehicleCategory,
        floor: FloorId,
    },

    #[error("slot {slot} declared in both {first} and {second}")]
    DuplicateSlot {
        slot: SlotId,
        first: String,
        second: String,
    },

    #[error("empty {kind} identifier")]
    EmptyIdentifier { kind: &'static str },

    #[error("{kind} identifier {id:?} contains a reserved character")]
    ReservedCharacter { kind: &'static str, id: String },
}

/// A received message that is not a well-formed occupancy event.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventDecodeError {
    #[error("topic {0:?} is not parking/<floor>/slot<id>")]
    MalformedTopic(String),

    #[error("payload {0:?} is neither \"occupied\" nor \"free\"")]
    UnknownPayload(String),

    #[error("payload is not valid UTF-8")]
    NonUtf8Payload,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AllocationError {
    #[error("unknown vehicle category: {0}")]
    UnknownCategory(VehicleCategory),

    #[error("no free slots available for {0}")]
    NoFreeSlot(VehicleCategory),

    #[error("could not publish occupancy of slot {slot} on {floor}: {source}")]
    PublishFailed {
        slot: SlotId,
        floor: FloorId,
        #[source]
        source: BrokerError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReleaseError {
    #[error("unknown vehicle category: {0}")]
    UnknownCategory(VehicleCategory),

    #[error("slot {slot} does not belong to {category}")]
    SlotNotInCategory {
        category: VehicleCategory,
        slot: SlotId,
    },

    #[error("slot {0} is not occupied")]
    SlotNotOccupied(SlotId),

    #[error("could not publish release of slot {slot} on {floor}: {source}")]
    PublishFailed {
        slot: SlotId,
        floor: FloorId,
        #[source]
        source: BrokerError,
    },
}

impl AllocationError {
    /// True when the publish failed only because no broker session existed.
    pub fn is_not_connected(&self) -> bool {
        matches!(self, Self::PublishFailed { source, .. } if source.is_not_connected())
    }
}

impl ReleaseError {
    pub fn is_not_connected(&self) -> bool {
        matches!(self, Self::PublishFailed { source, .. } if source.is_not_connected())
    }
}
