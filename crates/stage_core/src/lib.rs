//! # Stage Core
//!
//! Deterministic grid simulation core for tile stages populated by pawns,
//! objects and facilities.
//!
//! This crate contains **only** deterministic logic:
//! - No rendering
//! - No IO
//! - No system randomness
//! - No floating-point math in the tick (uses fixed-point)
//!
//! Rendering, audio and direction logic consume [`events::StageEvent`]s and
//! push [`operation::PawnOperation`]s; everything else happens here.
//!
//! ## Crate Structure
//!
//! - [`square`] - Grid coordinates and footprints
//! - [`stage`] / [`stage_generation`] - Tile set and seeded generation
//! - [`entity_index`] - Per-category spatial occupancy index
//! - [`pathfinding`] - Request-based A* path finder
//! - [`robot`] / [`brain`] - Pawn decision state machine and its hooks
//! - [`controller`] - Per-entity controllers and movement primitives
//! - [`simulation`] - Tick loop tying it all together

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod brain;
pub mod context;
pub mod controller;
pub mod entity_index;
pub mod error;
pub mod events;
pub mod fsm;
mod handlers;
pub mod math;
pub mod operation;
pub mod pathfinding;
pub mod robot;
pub mod simulation;
pub mod square;
pub mod stage;
pub mod stage_generation;
pub mod task;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::brain::{
        BrainSpec, DecisionContext, IdleBrain, RobotBrain, RobotStatus, ScriptedBrain, WanderBrain,
    };
    pub use crate::context::{ActionContext, StageContext};
    pub use crate::controller::{
        FacilityController, ObjectController, PawnController, PawnState,
    };
    pub use crate::entity_index::{
        EntityCategory, EntityId, OccupancyIndex, Placement, StageEntityData,
    };
    pub use crate::error::{Result, StageError};
    pub use crate::events::{EmoteKind, OperationOutcome, StageEvent, StrikeKind};
    pub use crate::math::{Fixed, Vec2Fixed};
    pub use crate::operation::{OperationKind, OperationQueue, PawnOperation};
    pub use crate::pathfinding::{
        chebyshev_distance, find_path, manhattan_distance, stage_walkable, MetricKind, PathFinder,
        PathFinderConfig, PathRequest, PathState, RequestId, StageView,
    };
    pub use crate::robot::{Robot, RobotConfig, RobotState};
    pub use crate::simulation::{SimulationConfig, StageSimulation, TICK_RATE};
    pub use crate::square::{Footprint, Square};
    pub use crate::stage::{Decoration, SquareTile, StageData, TerrainProperty};
    pub use crate::stage_generation::{generate_stage, StageConfig, StageRng};
    pub use crate::task::{CancellationToken, Countdown, TaskPoll};
}
