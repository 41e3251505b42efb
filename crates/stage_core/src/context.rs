//! Explicit simulation context.
//!
//! Everything a subsystem needs is handed to it through these structs; there
//! is no global stage or path finder.

use std::collections::BTreeMap;

use crate::controller::{FacilityController, ObjectController};
use crate::entity_index::{EntityId, StageEntityData};
use crate::events::StageEvent;
use crate::math::Fixed;
use crate::pathfinding::{PathFinder, StageView};
use crate::robot::RobotConfig;
use crate::simulation::SimulationConfig;
use crate::stage::StageData;
use crate::stage_generation::StageRng;

/// Shared state of one stage: tiles, occupancy, path finder, RNG and tuning.
#[derive(Debug)]
pub struct StageContext {
    /// Tile set.
    pub stage: StageData,
    /// Occupancy of all entity categories.
    pub entities: StageEntityData,
    /// Path request queue.
    pub path_finder: PathFinder,
    /// Deterministic RNG for decisions.
    pub rng: StageRng,
    /// Tuning.
    pub config: SimulationConfig,
}

impl StageContext {
    /// Build a context around an existing stage.
    #[must_use]
    pub fn new(stage: StageData, config: SimulationConfig) -> Self {
        Self {
            stage,
            entities: StageEntityData::new(),
            path_finder: PathFinder::new(config.path_finder.clone()),
            rng: StageRng::new(config.seed),
            config,
        }
    }

    /// Read-only view for walkability checks.
    #[must_use]
    pub fn view(&self) -> StageView<'_> {
        StageView {
            stage: &self.stage,
            entities: &self.entities,
        }
    }
}

/// Per-tick borrow of the stage handed to a robot and its running operation.
#[derive(Debug)]
pub struct ActionContext<'a> {
    /// Tile set.
    pub stage: &'a StageData,
    /// Occupancy of all entity categories.
    pub entities: &'a mut StageEntityData,
    /// Path request queue.
    pub path_finder: &'a mut PathFinder,
    /// Deterministic RNG for decisions.
    pub rng: &'a mut StageRng,
    /// Spawned objects.
    pub objects: &'a mut BTreeMap<EntityId, ObjectController>,
    /// Spawned facilities.
    pub facilities: &'a mut BTreeMap<EntityId, FacilityController>,
    /// Event sink.
    pub events: &'a mut Vec<StageEvent>,
    /// Robot tuning.
    pub config: &'a RobotConfig,
    /// Seconds per tick.
    pub dt: Fixed,
}

impl ActionContext<'_> {
    /// Read-only view for walkability checks.
    #[must_use]
    pub fn view(&self) -> StageView<'_> {
        StageView {
            stage: self.stage,
            entities: &*self.entities,
        }
    }

    /// Record an event.
    pub fn emit(&mut self, event: StageEvent) {
        tracing::trace!(event = event.tag(), "Stage event");
        self.events.push(event);
    }
}
