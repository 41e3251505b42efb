//! Seeded stage generation.
//!
//! Fills a rectangle with tiles, punches holes into it and assigns terrain
//! palettes and decorations. The same [`StageConfig`] always yields the same
//! [`StageData`].

use serde::{Deserialize, Serialize};

use crate::square::{grid_squares, Footprint, Square};
use crate::stage::{Decoration, SquareTile, StageData, TerrainProperty};

/// Stage generation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageConfig {
    /// Stage width in cells.
    pub width: u32,
    /// Stage height in cells.
    pub height: u32,
    /// Random seed for deterministic generation.
    pub seed: u64,
    /// Holes per thousand cells (0 = fully intact rectangle).
    pub holes_per_mille: u32,
    /// Number of terrain palettes to pick from.
    pub palette_count: u16,
    /// Surface variants per palette.
    pub variants_per_palette: u8,
    /// Decorations per thousand cells.
    pub decorations_per_mille: u32,
    /// Cells kept free of holes, e.g. spawn areas.
    pub keep_intact: Vec<(Square, Footprint)>,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            width: 32,
            height: 32,
            seed: 12345,
            holes_per_mille: 0,
            palette_count: 1,
            variants_per_palette: 4,
            decorations_per_mille: 50,
            keep_intact: Vec::new(),
        }
    }
}

impl StageConfig {
    /// An open rectangle with no holes.
    #[must_use]
    pub fn open(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..Default::default()
        }
    }

    /// Set the random seed.
    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set hole density in holes per thousand cells (capped at 1000).
    #[must_use]
    pub fn with_holes_per_mille(mut self, holes: u32) -> Self {
        self.holes_per_mille = holes.min(1000);
        self
    }

    /// Protect an area from holes.
    #[must_use]
    pub fn keeping_intact(mut self, anchor: Square, footprint: Footprint) -> Self {
        self.keep_intact.push((anchor, footprint));
        self
    }

    fn is_protected(&self, square: Square) -> bool {
        self.keep_intact
            .iter()
            .any(|(anchor, footprint)| footprint.covers(*anchor, square))
    }
}

/// Deterministic RNG shared by stage generation and pawn decisions.
///
/// A linear congruential generator: cheap, seedable and identical on every
/// platform. Not suitable for anything security related.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRng {
    state: u64,
}

impl StageRng {
    /// Create a generator from a seed.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            state: seed.wrapping_add(0x9E37_79B9_7F4A_7C15),
        }
    }

    /// Next raw value.
    pub fn next_u64(&mut self) -> u64 {
        self.state = self
            .state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        self.state >> 16
    }

    /// Uniform index in `0..len`. Returns 0 when `len` is 0.
    pub fn next_index(&mut self, len: usize) -> usize {
        if len == 0 {
            return 0;
        }
        (self.next_u64() % len as u64) as usize
    }

    /// Uniform value in `min..max` (returns `min` for an empty range).
    pub fn next_range(&mut self, min: i32, max: i32) -> i32 {
        if max <= min {
            return min;
        }
        let range = (i64::from(max) - i64::from(min)) as u64;
        (i64::from(min) + (self.next_u64() % range) as i64) as i32
    }

    /// True with probability `per_mille / 1000`.
    pub fn chance_per_mille(&mut self, per_mille: u32) -> bool {
        (self.next_u64() % 1000) < u64::from(per_mille)
    }
}

/// Generate a stage from a configuration.
#[must_use]
pub fn generate_stage(config: &StageConfig) -> StageData {
    let mut rng = StageRng::new(config.seed);
    let mut stage = StageData::new();
    let palettes = config.palette_count.max(1);
    let variants = config.variants_per_palette.max(1);

    for square in grid_squares(config.width, config.height) {
        // Every cell consumes the same rolls, protected or not.
        let hole = rng.chance_per_mille(config.holes_per_mille);
        let palette = (rng.next_u64() % u64::from(palettes)) as u16;
        let variant = (rng.next_u64() % u64::from(variants)) as u8;
        let decorated = rng.chance_per_mille(config.decorations_per_mille);
        let decoration_id = (rng.next_u64() % 16) as u16;

        if hole && !config.is_protected(square) {
            continue;
        }

        stage.insert_tile(SquareTile {
            square,
            terrain: TerrainProperty { palette, variant },
            decoration: decorated.then_some(Decoration(decoration_id)),
        });
    }

    tracing::debug!(
        width = config.width,
        height = config.height,
        seed = config.seed,
        tiles = stage.len(),
        "Generated stage"
    );

    stage
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_stage_has_every_cell() {
        let stage = generate_stage(&StageConfig::open(10, 10));
        assert_eq!(stage.len(), 100);
        assert!(stage.check_area_intact(Square::ZERO, Footprint::new(10, 10)));
    }

    #[test]
    fn test_generation_is_deterministic() {
        let config = StageConfig::open(24, 24)
            .with_seed(99)
            .with_holes_per_mille(200);
        let a = generate_stage(&config);
        let b = generate_stage(&config);
        let tiles_a: Vec<_> = a.iter().copied().collect();
        let tiles_b: Vec<_> = b.iter().copied().collect();
        assert_eq!(tiles_a, tiles_b);
    }

    #[test]
    fn test_holes_are_punched_but_protected_area_survives() {
        let config = StageConfig::open(30, 30)
            .with_seed(3)
            .with_holes_per_mille(500)
            .keeping_intact(Square::new(0, 0), Footprint::new(4, 4));
        let stage = generate_stage(&config);
        assert!(stage.len() < 900);
        assert!(stage.check_area_intact(Square::ZERO, Footprint::new(4, 4)));
    }

    #[test]
    fn test_palette_stays_in_range() {
        let config = StageConfig {
            palette_count: 3,
            ..StageConfig::open(12, 12)
        };
        let stage = generate_stage(&config);
        assert!(stage.iter().all(|t| t.terrain.palette < 3));
    }

    #[test]
    fn test_rng_range_bounds() {
        let mut rng = StageRng::new(42);
        for _ in 0..1000 {
            let v = rng.next_range(-5, 5);
            assert!((-5..5).contains(&v));
        }
        assert_eq!(rng.next_range(3, 3), 3);
        assert_eq!(rng.next_index(0), 0);
    }
}
