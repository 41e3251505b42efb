//! Integer grid coordinates and rectangular footprints.
//!
//! A [`Square`] names one cell of the stage grid. Entities cover a
//! [`Footprint`] of cells anchored at a square: the anchor is the footprint's
//! minimum corner.

use std::fmt;
use std::ops::{Add, Sub};

use serde::{Deserialize, Serialize};

use crate::error::StageError;
use crate::math::{Fixed, Vec2Fixed};

/// Integer 2D grid coordinate.
///
/// Ordered by `(y, x)` so sorted collections iterate row by row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Square {
    /// Column.
    pub x: i32,
    /// Row.
    pub y: i32,
}

/// Offsets of the eight neighbouring cells, east first, clockwise.
pub const NEIGHBOR_OFFSETS: [Square; 8] = [
    Square::new(1, 0),
    Square::new(1, 1),
    Square::new(0, 1),
    Square::new(-1, 1),
    Square::new(-1, 0),
    Square::new(-1, -1),
    Square::new(0, -1),
    Square::new(1, -1),
];

impl Square {
    /// The origin cell.
    pub const ZERO: Self = Self { x: 0, y: 0 };

    /// Create a square.
    #[must_use]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Chebyshev length of this square read as a delta: `max(|x|, |y|)`.
    #[must_use]
    pub const fn clength(self) -> i32 {
        let ax = self.x.abs();
        let ay = self.y.abs();
        if ax > ay {
            ax
        } else {
            ay
        }
    }

    /// Taxicab length of this square read as a delta: `|x| + |y|`.
    #[must_use]
    pub const fn mlength(self) -> i32 {
        self.x.abs() + self.y.abs()
    }

    /// Chebyshev distance between two squares.
    ///
    /// This is the default step cost and heuristic of the path finder, so a
    /// diagonal step costs the same as a cardinal one.
    #[must_use]
    pub fn distance(a: Self, b: Self) -> i32 {
        (b - a).clength()
    }

    /// Stable string identifier, `"x,y"`.
    #[must_use]
    pub fn sid(self) -> String {
        self.to_string()
    }

    /// Parse an identifier produced by [`Square::sid`].
    #[must_use]
    pub fn from_sid(sid: &str) -> Option<Self> {
        let (x, y) = sid.split_once(',')?;
        Some(Self::new(x.trim().parse().ok()?, y.trim().parse().ok()?))
    }

    /// True when `other` is one of the eight cells around `self`.
    #[must_use]
    pub fn is_adjacent(self, other: Self) -> bool {
        Self::distance(self, other) == 1
    }

    /// The eight neighbouring cells in [`NEIGHBOR_OFFSETS`] order.
    pub fn neighbors8(self) -> impl Iterator<Item = Self> {
        NEIGHBOR_OFFSETS.into_iter().map(move |offset| self + offset)
    }

    /// World-space position of this cell.
    #[must_use]
    pub fn to_world(self) -> Vec2Fixed {
        Vec2Fixed::from_ints(self.x, self.y)
    }

    /// Nearest cell to a world-space position (halves round away from zero).
    #[must_use]
    pub fn nearest(world: Vec2Fixed) -> Self {
        Self::new(round_to_i32(world.x), round_to_i32(world.y))
    }
}

fn round_to_i32(value: Fixed) -> i32 {
    value.round().saturating_to_num::<i32>()
}

impl fmt::Display for Square {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.x, self.y)
    }
}

impl PartialOrd for Square {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Square {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.y, self.x).cmp(&(other.y, other.x))
    }
}

/// Every square of a `width × height` grid anchored at the origin, row by
/// row.
pub fn grid_squares(width: u32, height: u32) -> impl Iterator<Item = Square> {
    let width = i32::try_from(width).unwrap_or(i32::MAX);
    let height = i32::try_from(height).unwrap_or(i32::MAX);
    (0..height).flat_map(move |y| (0..width).map(move |x| Square::new(x, y)))
}

impl Add for Square {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Square {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

/// Rectangular area an entity covers, `width × height` cells.
///
/// Both sides lie in `1..=Footprint::MAX_SIDE`. Deserialization rejects
/// anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "FootprintDef")]
pub struct Footprint {
    width: u32,
    height: u32,
}

#[derive(Deserialize)]
struct FootprintDef {
    width: u32,
    height: u32,
}

impl TryFrom<FootprintDef> for Footprint {
    type Error = StageError;

    fn try_from(def: FootprintDef) -> Result<Self, Self::Error> {
        Self::try_new(def.width, def.height)
    }
}

impl Default for Footprint {
    fn default() -> Self {
        Self::UNIT
    }
}

impl Footprint {
    /// A single cell.
    pub const UNIT: Self = Self {
        width: 1,
        height: 1,
    };

    /// Longest allowed side.
    pub const MAX_SIDE: u32 = 1024;

    /// Create a footprint, clamping each side into `1..=MAX_SIDE`.
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.clamp(1, Self::MAX_SIDE),
            height: height.clamp(1, Self::MAX_SIDE),
        }
    }

    /// Create a footprint, rejecting sides outside `1..=MAX_SIDE`.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::InvalidFootprint`] for a zero or oversized side.
    pub fn try_new(width: u32, height: u32) -> Result<Self, StageError> {
        let valid = |side: u32| (1..=Self::MAX_SIDE).contains(&side);
        if valid(width) && valid(height) {
            Ok(Self { width, height })
        } else {
            Err(StageError::InvalidFootprint { width, height })
        }
    }

    /// Cells along x.
    #[must_use]
    pub const fn width(self) -> u32 {
        self.width
    }

    /// Cells along y.
    #[must_use]
    pub const fn height(self) -> u32 {
        self.height
    }

    /// Number of cells covered.
    #[must_use]
    pub const fn area(self) -> u32 {
        self.width * self.height
    }

    fn extent(self) -> (i32, i32) {
        let side = |v: u32| i32::try_from(v.clamp(1, Self::MAX_SIDE)).unwrap_or(1);
        (side(self.width), side(self.height))
    }

    /// Cells covered when anchored at `anchor`, row by row.
    pub fn cells(self, anchor: Square) -> impl Iterator<Item = Square> {
        let (width, height) = self.extent();
        (0..height).flat_map(move |dy| (0..width).map(move |dx| anchor + Square::new(dx, dy)))
    }

    /// True when `cell` lies inside this footprint anchored at `anchor`.
    #[must_use]
    pub fn covers(self, anchor: Square, cell: Square) -> bool {
        let (width, height) = self.extent();
        let d = cell - anchor;
        d.x >= 0 && d.y >= 0 && d.x < width && d.y < height
    }
}
