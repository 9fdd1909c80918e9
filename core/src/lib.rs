//! `parking-core`: slot allocation and occupancy propagation.
//!
//! The [`Allocator`] is the single writer of occupancy: it picks a free slot
//! from the [`SlotCatalog`], publishes the change through a broker session
//! and commits to its [`OccupancyStore`] only once the publish is confirmed.
//! A [`DisplayListener`] rebuilds a read-only [`DisplayMirror`] from the
//! events it receives.

pub mod allocator;
pub mod catalog;
pub mod error;
pub mod event;
pub mod mirror;
pub mod store;

pub use allocator::{Allocator, EventPublisher};
pub use catalog::{
    Availability, CategoryLayout, FloorId, FloorLayout, SlotCatalog, SlotId, SlotLocation,
    VehicleCategory, default_layout,
};
pub use error::{AllocationError, CatalogError, EventDecodeError, ReleaseError};
pub use event::{Occupancy, OccupancyChangeEvent, TOPIC_FILTER};
pub use mirror::{DisplayListener, DisplayMirror};
pub use store::OccupancyStore;
