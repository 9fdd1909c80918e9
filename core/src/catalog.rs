//! Static slot layout: vehicle categories, their floors, and slot ids.
//!
//! Catalog order is allocation preference: floors in declaration order, and
//! slots in declaration order within a floor. Slot ids are unique across the
//! whole catalog, which [`SlotCatalog::new`] enforces.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CatalogError;

/// Characters that would change the meaning of a topic level.
const RESERVED: &[char] = &['/', '+', '#'];

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }
    };
}

id_type!(
    /// A vehicle category declared by the catalog, e.g. `electric`.
    VehicleCategory
);
id_type!(
    /// Floor label, e.g. `floor1`.
    FloorId
);
id_type!(
    /// Slot label, unique catalog-wide, e.g. `16`.
    SlotId
);

/// Slots of one floor, in allocation order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FloorLayout {
    pub floor: FloorId,
    #[serde(default)]
    pub slots: Vec<SlotId>,
}

/// Floors of one category, in allocation order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryLayout {
    pub category: VehicleCategory,
    #[serde(default)]
    pub floors: Vec<FloorLayout>,
}

impl FloorLayout {
    pub fn new(floor: &str, slots: &[&str]) -> Self {
        Self {
            floor: FloorId::from(floor),
            slots: slots.iter().copied().map(SlotId::from).collect(),
        }
    }
}

impl CategoryLayout {
    pub fn new(category: &str, floors: Vec<FloorLayout>) -> Self {
        Self {
            category: VehicleCategory::from(category),
            floors,
        }
    }
}

/// Where a slot lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotLocation {
    pub category: VehicleCategory,
    pub floor: FloorId,
}

/// Slot counts for one category against some occupancy set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Availability {
    pub category: VehicleCategory,
    pub total: usize,
    pub occupied: usize,
    pub free: usize,
}

/// Immutable, validated slot layout.
#[derive(Debug, Clone)]
pub struct SlotCatalog {
    categories: Vec<CategoryLayout>,
    locations: HashMap<SlotId, SlotLocation>,
}

/// The garage layout the services run with when no catalog is configured.
pub fn default_layout() -> Vec<CategoryLayout> {
    vec![
        CategoryLayout::new(
            "electric",
            vec![
                FloorLayout::new("floor1", &["10", "11", "12"]),
                FloorLayout::new("floor2", &["20", "21", "22"]),
            ],
        ),
        CategoryLayout::new(
            "motorcycle",
            vec![
                FloorLayout::new("floor1", &["13", "14"]),
                FloorLayout::new("floor2", &["23", "24"]),
            ],
        ),
        CategoryLayout::new(
            "car",
            vec![
                FloorLayout::new("floor1", &["15", "16", "17", "18", "19"]),
                FloorLayout::new("floor2", &["25", "26", "27", "28", "29"]),
            ],
        ),
    ]
}

fn check_id(kind: &'static str, id: &str, reserved: bool) -> Result<(), CatalogError> {
    if id.trim().is_empty() {
        return Err(CatalogError::EmptyIdentifier { kind });
    }
    if reserved && (id.contains(RESERVED) || id.contains('\0')) {
        return Err(CatalogError::ReservedCharacter {
            kind,
            id: id.to_string(),
        });
    }
    Ok(())
}

fn validate(layout: &[CategoryLayout]) -> Result<(), CatalogError> {
    let mut categories = HashSet::new();
    let mut owners: HashMap<&SlotId, String> = HashMap::new();

    for entry in layout {
        check_id("category", entry.category.as_str(), false)?;
        if !categories.insert(&entry.category) {
            return Err(CatalogError::DuplicateCategory(entry.category.clone()));
        }

        let mut floors = HashSet::new();
        for floor in &entry.floors {
            check_id("floor", floor.floor.as_str(), true)?;
            if !floors.insert(&floor.floor) {
                return Err(CatalogError::DuplicateFloor {
                    category: entry.category.clone(),
                    floor: floor.floor.clone(),
                });
            }

            for slot in &floor.slots {
                check_id("slot", slot.as_str(), true)?;
                let owner = format!("{}/{}", entry.category, floor.floor);
                if let Some(first) = owners.get(slot) {
                    return Err(CatalogError::DuplicateSlot {
                        slot: slot.clone(),
                        first: first.clone(),
                        second: owner,
                    });
                }
                owners.insert(slot, owner);
            }
        }
    }
    Ok(())
}

impl SlotCatalog {
    /// Validate `layout` and build the catalog.
    pub fn new(layout: Vec<CategoryLayout>) -> Result<Self, CatalogError> {
        validate(&layout)?;
        Ok(Self::assemble(layout))
    }

    /// The catalog built from [`default_layout`].
    pub fn standard() -> Self {
        Self::assemble(default_layout())
    }

    fn assemble(categories: Vec<CategoryLayout>) -> Self {
        let mut locations = HashMap::new();
        for entry in &categories {
            for floor in &entry.floors {
                for slot in &floor.slots {
                    locations.insert(
                        slot.clone(),
                        SlotLocation {
                            category: entry.category.clone(),
                            floor: floor.floor.clone(),
                        },
                    );
                }
            }
        }
        Self {
            categories,
            locations,
        }
    }

    pub fn layout(&self) -> &[CategoryLayout] {
        &self.categories
    }

    pub fn categories(&self) -> impl Iterator<Item = &VehicleCategory> {
        self.categories.iter().map(|entry| &entry.category)
    }

    pub fn contains_category(&self, category: &VehicleCategory) -> bool {
        self.entry(category).is_some()
    }

    fn entry(&self, category: &VehicleCategory) -> Option<&CategoryLayout> {
        self.categories
            .iter()
            .find(|entry| &entry.category == category)
    }

    /// Floors of `category` in allocation order.
    pub fn floors(&self, category: &VehicleCategory) -> Option<&[FloorLayout]> {
        self.entry(category).map(|entry| entry.floors.as_slice())
    }

    /// Every `(floor, slot)` of `category` in allocation order.
    pub fn slots_for<'a>(
        &'a self,
        category: &VehicleCategory,
    ) -> Option<impl Iterator<Item = (&'a FloorId, &'a SlotId)> + 'a> {
        let entry = self.entry(category)?;
        Some(
            entry
                .floors
                .iter()
                .flat_map(|floor| floor.slots.iter().map(move |slot| (&floor.floor, slot))),
        )
    }

    pub fn locate(&self, slot: &SlotId) -> Option<&SlotLocation> {
        self.locations.get(slot)
    }

    /// Floor of `slot` if it belongs to `category`.
    pub fn floor_in_category(&self, category: &VehicleCategory, slot: &SlotId) -> Option<&FloorId> {
        self.locate(slot)
            .filter(|location| &location.category == category)
            .map(|location| &location.floor)
    }

    pub fn contains_slot(&self, slot: &SlotId) -> bool {
        self.locations.contains_key(slot)
    }

    pub fn slot_count(&self) -> usize {
        self.locations.len()
    }

    /// Per-category slot counts against `occupied`, in catalog order.
    pub fn availability(&self, occupied: &BTreeSet<SlotId>) -> Vec<Availability> {
        self.categories
            .iter()
            .map(|entry| {
                let slots = entry.floors.iter().flat_map(|floor| floor.slots.iter());
                let (total, taken) = slots.fold((0, 0), |(total, taken), slot| {
                    (total + 1, taken + usize::from(occupied.contains(slot)))
                });
                Availability {
                    category: entry.category.clone(),
                    total,
                    occupied: taken,
                    free: total - taken,
                }
            })
            .collect()
    }
}
