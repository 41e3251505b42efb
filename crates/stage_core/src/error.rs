//! Error types for the stage core.
//!
//! Most runtime paths degrade silently (empty paths, no-op operations);
//! these errors only surface at the spawn/command API edge where a caller can
//! act on them.

use thiserror::Error;

use crate::entity_index::EntityCategory;
use crate::square::{Footprint, Square};

/// Result type alias using [`StageError`].
pub type Result<T> = std::result::Result<T, StageError>;

/// Top-level error type for stage operations.
#[derive(Debug, Error)]
pub enum StageError {
    /// The footprint does not fit entirely on existing tiles.
    #[error("Area at ({anchor}) is not intact for {footprint:?}")]
    AreaNotIntact {
        /// Requested anchor.
        anchor: Square,
        /// Requested footprint.
        footprint: Footprint,
    },

    /// Another pawn or a facility already covers part of the footprint.
    #[error("Area at ({anchor}) is occupied")]
    AreaOccupied {
        /// Requested anchor.
        anchor: Square,
    },

    /// A footprint side is zero or larger than [`Footprint::MAX_SIDE`].
    #[error("Invalid footprint {width}x{height}")]
    InvalidFootprint {
        /// Requested width.
        width: u32,
        /// Requested height.
        height: u32,
    },

    /// Entity id is unknown in the given category.
    #[error("{category:?} not found: {id}")]
    EntityNotFound {
        /// Category looked up.
        category: EntityCategory,
        /// Missing id.
        id: u64,
    },

    /// The pawn has no robot attached.
    #[error("Pawn {0} has no robot")]
    NoRobot(u64),

    /// The pawn already has a robot attached.
    #[error("Pawn {0} already has a robot")]
    RobotAlreadyAttached(u64),
}
