//! Walkable tile set of a stage.
//!
//! A stage is a sparse set of [`SquareTile`]s: any coordinate without a tile
//! is a hole. Tiles are created once by stage generation; afterwards only the
//! decoration overlay changes.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::square::{grid_squares, Footprint, Square};
use crate::stage_generation::StageRng;

/// Terrain look of a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TerrainProperty {
    /// Palette the surface is drawn from.
    pub palette: u16,
    /// Surface variant within the palette.
    pub variant: u8,
}

/// Decoration overlay drawn on top of the terrain (grass tuft, rubble...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Decoration(pub u16);

/// One walkable grid cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SquareTile {
    /// Cell coordinate.
    pub square: Square,
    /// Terrain property.
    pub terrain: TerrainProperty,
    /// Optional decoration overlay.
    pub decoration: Option<Decoration>,
}

impl SquareTile {
    /// Plain tile with default terrain and no decoration.
    #[must_use]
    pub fn plain(square: Square) -> Self {
        Self {
            square,
            terrain: TerrainProperty::default(),
            decoration: None,
        }
    }
}

/// The set of all tiles on a stage.
///
/// `tiles` gives O(1) lookup; `order` keeps insertion order so random
/// sampling is deterministic for a given RNG state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageData {
    tiles: HashMap<Square, SquareTile>,
    order: Vec<Square>,
}

impl StageData {
    /// Create an empty stage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage with a plain tile on every cell of a `width × height` rectangle
    /// anchored at the origin.
    #[must_use]
    pub fn rectangle(width: u32, height: u32) -> Self {
        let mut stage = Self::new();
        for square in grid_squares(width, height) {
            stage.insert_tile(SquareTile::plain(square));
        }
        stage
    }

    /// Insert or replace a tile. Returns the replaced tile, if any.
    pub fn insert_tile(&mut self, tile: SquareTile) -> Option<SquareTile> {
        let previous = self.tiles.insert(tile.square, tile);
        if previous.is_none() {
            self.order.push(tile.square);
        }
        previous
    }

    /// Remove a tile, turning the cell into a hole.
    pub fn remove_tile(&mut self, square: Square) -> Option<SquareTile> {
        let removed = self.tiles.remove(&square)?;
        self.order.retain(|s| *s != square);
        Some(removed)
    }

    /// Tile at a coordinate.
    #[must_use]
    pub fn tile(&self, square: Square) -> Option<&SquareTile> {
        self.tiles.get(&square)
    }

    /// Set or clear the decoration on an existing tile.
    /// Returns `false` when there is no tile at `square`.
    pub fn set_decoration(&mut self, square: Square, decoration: Option<Decoration>) -> bool {
        match self.tiles.get_mut(&square) {
            Some(tile) => {
                tile.decoration = decoration;
                true
            }
            None => false,
        }
    }

    /// True if a tile exists at `square`.
    #[must_use]
    pub fn check_tile_exist(&self, square: Square) -> bool {
        self.tiles.contains_key(&square)
    }

    /// True iff every cell of `area` anchored at `pivot` has a tile.
    #[must_use]
    pub fn check_area_intact(&self, pivot: Square, area: Footprint) -> bool {
        area.cells(pivot).all(|cell| self.check_tile_exist(cell))
    }

    /// Uniformly random tile coordinate, or `None` for an empty stage.
    pub fn random_tile_coord(&self, rng: &mut StageRng) -> Option<Square> {
        if self.order.is_empty() {
            return None;
        }
        let index = rng.next_index(self.order.len());
        self.order.get(index).copied()
    }

    /// Number of tiles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// True when the stage has no tiles.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Tiles in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &SquareTile> {
        self.order.iter().filter_map(|square| self.tiles.get(square))
    }

    /// Smallest and largest coordinates covered, or `None` when empty.
    #[must_use]
    pub fn bounds(&self) -> Option<(Square, Square)> {
        let mut iter = self.order.iter();
        let first = *iter.next()?;
        Some(iter.fold((first, first), |(min, max), s| {
            (
                Square::new(min.x.min(s.x), min.y.min(s.y)),
                Square::new(max.x.max(s.x), max.y.max(s.y)),
            )
        }))
    }

    /// Check the key/value invariant of the tile map.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.order.len() == self.tiles.len()
            && self.tiles.iter().all(|(key, tile)| *key == tile.square)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rectangle_contains_every_cell() {
        let stage = StageData::rectangle(4, 3);
        assert_eq!(stage.len(), 12);
        assert!(stage.check_tile_exist(Square::new(3, 2)));
        assert!(!stage.check_tile_exist(Square::new(4, 2)));
        assert!(!stage.check_tile_exist(Square::new(-1, 0)));
        assert!(stage.is_consistent());
    }

    #[test]
    fn test_area_intact_until_a_corner_is_removed() {
        let mut stage = StageData::rectangle(10, 10);
        let pivot = Square::new(2, 2);
        let area = Footprint::new(3, 2);
        assert!(stage.check_area_intact(pivot, area));

        stage.remove_tile(Square::new(4, 3));
        assert!(!stage.check_area_intact(pivot, area));
        assert!(stage.check_area_intact(pivot, Footprint::new(2, 2)));
    }

    #[test]
    fn test_area_overhanging_edge_is_not_intact() {
        let stage = StageData::rectangle(5, 5);
        assert!(!stage.check_area_intact(Square::new(4, 4), Footprint::new(2, 1)));
    }

    #[test]
    fn test_reinserting_keeps_single_order_entry() {
        let mut stage = StageData::new();
        stage.insert_tile(SquareTile::plain(Square::new(1, 1)));
        let replaced = stage.insert_tile(SquareTile {
            decoration: Some(Decoration(3)),
            ..SquareTile::plain(Square::new(1, 1))
        });
        assert!(replaced.is_some());
        assert_eq!(stage.len(), 1);
        assert!(stage.is_consistent());
    }

    #[test]
    fn test_decoration_only_on_existing_tiles() {
        let mut stage = StageData::rectangle(2, 2);
        assert!(stage.set_decoration(Square::new(1, 1), Some(Decoration(7))));
        assert!(!stage.set_decoration(Square::new(5, 5), Some(Decoration(7))));
        assert_eq!(
            stage.tile(Square::new(1, 1)).and_then(|t| t.decoration),
            Some(Decoration(7))
        );
    }

    #[test]
    fn test_random_tile_coord_is_on_stage() {
        let mut stage = StageData::rectangle(6, 6);
        stage.remove_tile(Square::new(0, 0));
        let mut rng = StageRng::new(7);
        for _ in 0..200 {
            let square = stage.random_tile_coord(&mut rng).unwrap();
            assert!(stage.check_tile_exist(square));
        }
        assert_eq!(StageData::new().random_tile_coord(&mut rng), None);
    }

    #[test]
    fn test_bounds() {
        let stage = StageData::rectangle(3, 5);
        assert_eq!(stage.bounds(), Some((Square::new(0, 0), Square::new(2, 4))));
        assert_eq!(StageData::new().bounds(), None);
    }
}
