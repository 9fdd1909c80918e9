//! Set of occupied slots owned by the [`crate::Allocator`].

use std::collections::BTreeSet;

use crate::catalog::SlotId;

/// Occupied slot ids. Starts empty; only the allocator mutates it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OccupancyStore {
    occupied: BTreeSet<SlotId>,
}

impl OccupancyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_occupied(&self, slot: &SlotId) -> bool {
        self.occupied.contains(slot)
    }

    pub fn len(&self) -> usize {
        self.occupied.len()
    }

    pub fn is_empty(&self) -> bool {
        self.occupied.is_empty()
    }

    pub fn as_set(&self) -> &BTreeSet<SlotId> {
        &self.occupied
    }

    /// Returns false if the slot was already occupied.
    pub(crate) fn occupy(&mut self, slot: SlotId) -> bool {
        self.occupied.insert(slot)
    }

    /// Returns false if the slot was not occupied.
    pub(crate) fn release(&mut self, slot: &SlotId) -> bool {
        self.occupied.remove(slot)
    }
}
