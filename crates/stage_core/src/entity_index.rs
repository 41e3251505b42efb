//! Spatial occupancy index.
//!
//! Maps grid cells to the ids of the entities whose footprint covers them.
//! Pawns, objects and facilities each get their own [`OccupancyIndex`]; the
//! three are bundled in [`StageEntityData`] together with the cells pawns
//! have reserved for the step they are taking.
//!
//! The index stores position metadata only. It never owns the entities and
//! refers to them by [`EntityId`].
//!
//! All operations are lenient: unknown ids are no-ops, duplicate
//! registrations are rejected with a warning and leave the existing record
//! untouched.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::square::{Footprint, Square};

/// Unique identifier for stage entities.
pub type EntityId = u64;

/// Entity category tracked by the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityCategory {
    /// Mobile, robot-driven actors.
    Pawn,
    /// Loose items that can be carried.
    Object,
    /// Static buildings and workstations.
    Facility,
}

/// Recorded position of one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    /// Anchor (minimum corner) of the footprint.
    pub anchor: Square,
    /// Footprint size.
    pub footprint: Footprint,
}

impl Placement {
    fn cells(self) -> impl Iterator<Item = Square> {
        self.footprint.cells(self.anchor)
    }
}

/// Occupancy of one entity category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OccupancyIndex {
    placements: HashMap<EntityId, Placement>,
    occupancy: HashMap<Square, Vec<EntityId>>,
}

impl OccupancyIndex {
    /// Create an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an entity and add it to every cell of its footprint.
    ///
    /// Returns `false` (and logs a warning) if the id is already registered.
    pub fn register(&mut self, id: EntityId, anchor: Square, footprint: Footprint) -> bool {
        if let Some(existing) = self.placements.get(&id) {
            tracing::warn!(
                id,
                anchor = %existing.anchor,
                requested = %anchor,
                "Duplicate registration rejected"
            );
            return false;
        }

        let placement = Placement { anchor, footprint };
        self.placements.insert(id, placement);
        for cell in placement.cells() {
            self.add_to_cell(cell, id);
        }
        self.validate();
        true
    }

    /// Move an entity to a new anchor and/or footprint.
    ///
    /// No-op if the id is unknown or nothing changed. Cells covered by both
    /// the old and new footprint are left untouched.
    pub fn update(&mut self, id: EntityId, anchor: Square, footprint: Footprint) {
        let Some(old) = self.placements.get(&id).copied() else {
            return;
        };
        let new = Placement { anchor, footprint };
        if old == new {
            return;
        }

        let old_cells: HashSet<Square> = old.cells().collect();
        let new_cells: HashSet<Square> = new.cells().collect();

        for cell in new.cells().filter(|c| !old_cells.contains(c)) {
            self.add_to_cell(cell, id);
        }
        for cell in old.cells().filter(|c| !new_cells.contains(c)) {
            self.remove_from_cell(cell, id);
        }

        self.placements.insert(id, new);
        self.validate();
    }

    /// Move an entity keeping its recorded footprint.
    pub fn update_anchor(&mut self, id: EntityId, anchor: Square) {
        if let Some(footprint) = self.footprint(id) {
            self.update(id, anchor, footprint);
        }
    }

    /// Forget an entity. No-op if unknown.
    pub fn unregister(&mut self, id: EntityId) {
        let Some(old) = self.placements.remove(&id) else {
            return;
        };
        for cell in old.cells() {
            self.remove_from_cell(cell, id);
        }
        self.validate();
    }

    /// True if the id is registered.
    #[must_use]
    pub fn is_registered(&self, id: EntityId) -> bool {
        self.placements.contains_key(&id)
    }

    /// Anchor of a registered entity.
    #[must_use]
    pub fn anchor(&self, id: EntityId) -> Option<Square> {
        self.placements.get(&id).map(|p| p.anchor)
    }

    /// Footprint of a registered entity.
    #[must_use]
    pub fn footprint(&self, id: EntityId) -> Option<Footprint> {
        self.placements.get(&id).map(|p| p.footprint)
    }

    /// Placement of a registered entity.
    #[must_use]
    pub fn placement(&self, id: EntityId) -> Option<Placement> {
        self.placements.get(&id).copied()
    }

    /// Ids covering a cell, in registration order. Empty if none.
    #[must_use]
    pub fn occupants(&self, square: Square) -> &[EntityId] {
        self.occupancy.get(&square).map_or(&[], Vec::as_slice)
    }

    /// True if any entity covers the cell.
    #[must_use]
    pub fn is_occupied(&self, square: Square) -> bool {
        self.occupancy.contains_key(&square)
    }

    /// True if any entity other than `except` covers the cell.
    #[must_use]
    pub fn is_occupied_by_other(&self, square: Square, except: EntityId) -> bool {
        self.occupants(square).iter().any(|id| *id != except)
    }

    /// Number of registered entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.placements.len()
    }

    /// True when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.placements.is_empty()
    }

    /// Number of cells with at least one occupant.
    #[must_use]
    pub fn occupied_cell_count(&self) -> usize {
        self.occupancy.len()
    }

    /// Registered ids in ascending order.
    #[must_use]
    pub fn ids(&self) -> Vec<EntityId> {
        let mut ids: Vec<_> = self.placements.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Check that cells and placements agree exactly.
    ///
    /// Every footprint cell lists its entity once, every listed id covers the
    /// cell, and no empty cell lists are kept.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        let mut expected: HashMap<Square, Vec<EntityId>> = HashMap::new();
        for (id, placement) in &self.placements {
            for cell in placement.cells() {
                expected.entry(cell).or_default().push(*id);
            }
        }
        if expected.len() != self.occupancy.len() {
            return false;
        }
        expected.into_iter().all(|(cell, mut ids)| {
            let Some(actual) = self.occupancy.get(&cell) else {
                return false;
            };
            let mut actual = actual.clone();
            ids.sort_unstable();
            actual.sort_unstable();
            ids == actual
        })
    }

    fn add_to_cell(&mut self, cell: Square, id: EntityId) {
        let list = self.occupancy.entry(cell).or_default();
        if !list.contains(&id) {
            list.push(id);
        }
    }

    fn remove_from_cell(&mut self, cell: Square, id: EntityId) {
        if let Some(list) = self.occupancy.get_mut(&cell) {
            list.retain(|occupant| *occupant != id);
            if list.is_empty() {
                self.occupancy.remove(&cell);
            }
        }
    }

    #[cfg(feature = "debug-validation")]
    fn validate(&self) {
        debug_assert!(self.is_consistent(), "occupancy index out of sync");
    }

    #[cfg(not(feature = "debug-validation"))]
    #[inline]
    fn validate(&self) {}
}

/// Occupancy of every entity category on a stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageEntityData {
    /// Pawn occupancy.
    pub pawns: OccupancyIndex,
    /// Object occupancy.
    pub objects: OccupancyIndex,
    /// Facility occupancy.
    pub facilities: OccupancyIndex,
    /// Target cells of pawn steps in progress.
    pub reserved: OccupancyIndex,
}

impl StageEntityData {
    /// Create empty indices.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Index for a category.
    #[must_use]
    pub fn index(&self, category: EntityCategory) -> &OccupancyIndex {
        match category {
            EntityCategory::Pawn => &self.pawns,
            EntityCategory::Object => &self.objects,
            EntityCategory::Facility => &self.facilities,
        }
    }

    /// Mutable index for a category.
    pub fn index_mut(&mut self, category: EntityCategory) -> &mut OccupancyIndex {
        match category {
            EntityCategory::Pawn => &mut self.pawns,
            EntityCategory::Object => &mut self.objects,
            EntityCategory::Facility => &mut self.facilities,
        }
    }

    /// Register an entity in its category.
    pub fn register(
        &mut self,
        category: EntityCategory,
        id: EntityId,
        anchor: Square,
        footprint: Footprint,
    ) -> bool {
        self.index_mut(category).register(id, anchor, footprint)
    }

    /// Update an entity in its category.
    pub fn update(
        &mut self,
        category: EntityCategory,
        id: EntityId,
        anchor: Square,
        footprint: Footprint,
    ) {
        self.index_mut(category).update(id, anchor, footprint);
    }

    /// Unregister an entity from its category.
    pub fn unregister(&mut self, category: EntityCategory, id: EntityId) {
        self.index_mut(category).unregister(id);
    }

    /// Reserve the target area of a pawn's step, replacing any earlier
    /// reservation by the same pawn.
    pub fn reserve(&mut self, pawn: EntityId, anchor: Square, footprint: Footprint) {
        if self.reserved.is_registered(pawn) {
            self.reserved.update(pawn, anchor, footprint);
        } else {
            self.reserved.register(pawn, anchor, footprint);
        }
    }

    /// Drop a pawn's step reservation. No-op if it holds none.
    pub fn release(&mut self, pawn: EntityId) {
        self.reserved.unregister(pawn);
    }

    /// True if no pawn other than `mover` covers or has reserved any cell of
    /// `footprint` anchored at `anchor`, and no facility covers one. Objects
    /// never block.
    #[must_use]
    pub fn area_free_for(&self, mover: EntityId, anchor: Square, footprint: Footprint) -> bool {
        footprint.cells(anchor).all(|cell| {
            !self.pawns.is_occupied_by_other(cell, mover)
                && !self.reserved.is_occupied_by_other(cell, mover)
                && !self.facilities.is_occupied(cell)
        })
    }
}
