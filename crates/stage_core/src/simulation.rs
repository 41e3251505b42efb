//! Stage simulation loop.
//!
//! [`StageSimulation`] owns the [`StageContext`], every controller and every
//! robot, and advances them at a fixed tick rate.
//!
//! # Determinism
//!
//! - No floating-point math in the tick (positions use [`Fixed`])
//! - Decisions draw from the seeded [`StageRng`](crate::stage_generation::StageRng)
//! - Robots tick in ascending pawn id order
//! - Same config, spawns and requests always produce the same state hash
//!
//! # Example
//!
//! ```
//! use stage_core::prelude::*;
//!
//! let config = SimulationConfig::default().with_stage(StageConfig::open(10, 10));
//! let mut sim = StageSimulation::new(config);
//!
//! let pawn = sim.spawn_pawn(Square::new(0, 0), Footprint::UNIT).unwrap();
//! sim.attach_robot(pawn, Box::new(IdleBrain)).unwrap();
//! sim.request_operation(PawnOperation::move_to(pawn, Square::new(3, 0))).unwrap();
//!
//! sim.run_ticks(40);
//! assert_eq!(sim.pawn(pawn).map(|p| p.square()), Some(Square::new(3, 0)));
//! ```

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::brain::{BrainSpec, RobotBrain};
use crate::context::{ActionContext, StageContext};
use crate::controller::{FacilityController, ObjectController, PawnController};
use crate::entity_index::{EntityCategory, EntityId, StageEntityData};
use crate::error::{Result, StageError};
use crate::events::{OperationOutcome, StageEvent};
use crate::math::Fixed;
use crate::operation::PawnOperation;
use crate::pathfinding::{PathFinderConfig, StageView};
use crate::robot::{Robot, RobotConfig};
use crate::square::{Footprint, Square};
use crate::stage::StageData;
use crate::stage_generation::{generate_stage, StageConfig};

/// Ticks per second for the simulation.
pub const TICK_RATE: u32 = 20;

/// Everything needed to build a simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Ticks per simulated second.
    pub tick_rate: u32,
    /// Seed for decision randomness.
    pub seed: u64,
    /// Stage generation.
    pub stage: StageConfig,
    /// Path finder tuning.
    pub path_finder: PathFinderConfig,
    /// Robot and operation tuning.
    pub robot: RobotConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tick_rate: TICK_RATE,
            seed: 0,
            stage: StageConfig::default(),
            path_finder: PathFinderConfig::default(),
            robot: RobotConfig::default(),
        }
    }
}

impl SimulationConfig {
    /// Seconds per tick.
    #[must_use]
    pub fn dt(&self) -> Fixed {
        Fixed::ONE / Fixed::from_num(self.tick_rate.max(1))
    }

    /// Replace the stage generation parameters.
    #[must_use]
    pub fn with_stage(mut self, stage: StageConfig) -> Self {
        self.stage = stage;
        self
    }

    /// Set the decision seed.
    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Replace the robot tuning.
    #[must_use]
    pub fn with_robot(mut self, robot: RobotConfig) -> Self {
        self.robot = robot;
        self
    }

    /// Replace the path finder tuning.
    #[must_use]
    pub fn with_path_finder(mut self, path_finder: PathFinderConfig) -> Self {
        self.path_finder = path_finder;
        self
    }
}

/// The stage simulation.
///
/// # Tick Order
///
/// 1. **Robots** - each live pawn's robot, ascending id
/// 2. **Path finder** - resolves queued path requests
/// 3. **Events** - applies attack and strike damage, handles deaths
#[derive(Debug)]
pub struct StageSimulation {
    context: StageContext,
    pawns: BTreeMap<EntityId, PawnController>,
    objects: BTreeMap<EntityId, ObjectController>,
    facilities: BTreeMap<EntityId, FacilityController>,
    robots: BTreeMap<EntityId, Robot>,
    events: Vec<StageEvent>,
    next_id: EntityId,
    tick: u64,
}

impl StageSimulation {
    /// Generate a stage from `config.stage` and build a simulation on it.
    #[must_use]
    pub fn new(config: SimulationConfig) -> Self {
        let stage = generate_stage(&config.stage);
        Self::with_stage(stage, config)
    }

    /// Build a simulation on an existing stage. `config.stage` is ignored.
    #[must_use]
    pub fn with_stage(stage: StageData, config: SimulationConfig) -> Self {
        Self {
            context: StageContext::new(stage, config),
            pawns: BTreeMap::new(),
            objects: BTreeMap::new(),
            facilities: BTreeMap::new(),
            robots: BTreeMap::new(),
            events: Vec::new(),
            next_id: 1,
            tick: 0,
        }
    }

    /// Current tick number.
    #[must_use]
    pub const fn get_tick(&self) -> u64 {
        self.tick
    }

    /// Shared stage state.
    #[must_use]
    pub fn context(&self) -> &StageContext {
        &self.context
    }

    /// Tile set.
    #[must_use]
    pub fn stage(&self) -> &StageData {
        &self.context.stage
    }

    /// Occupancy of all entity categories.
    #[must_use]
    pub fn entities(&self) -> &StageEntityData {
        &self.context.entities
    }

    /// Tuning.
    #[must_use]
    pub fn config(&self) -> &SimulationConfig {
        &self.context.config
    }

    /// Pawn controller by id.
    #[must_use]
    pub fn pawn(&self, id: EntityId) -> Option<&PawnController> {
        self.pawns.get(&id)
    }

    /// All pawns, ascending id.
    pub fn pawns(&self) -> impl Iterator<Item = &PawnController> {
        self.pawns.values()
    }

    /// Object controller by id.
    #[must_use]
    pub fn object(&self, id: EntityId) -> Option<&ObjectController> {
        self.objects.get(&id)
    }

    /// All objects, ascending id.
    pub fn objects(&self) -> impl Iterator<Item = &ObjectController> {
        self.objects.values()
    }

    /// Facility controller by id.
    #[must_use]
    pub fn facility(&self, id: EntityId) -> Option<&FacilityController> {
        self.facilities.get(&id)
    }

    /// All facilities, ascending id.
    pub fn facilities(&self) -> impl Iterator<Item = &FacilityController> {
        self.facilities.values()
    }

    /// Robot attached to a pawn.
    #[must_use]
    pub fn robot(&self, pawn: EntityId) -> Option<&Robot> {
        self.robots.get(&pawn)
    }

    /// Events not yet drained.
    #[must_use]
    pub fn events(&self) -> &[StageEvent] {
        &self.events
    }

    /// Take every pending event.
    pub fn drain_events(&mut self) -> Vec<StageEvent> {
        std::mem::take(&mut self.events)
    }

    fn allocate_id(&mut self) -> EntityId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn check_intact(&self, anchor: Square, footprint: Footprint) -> Result<()> {
        if self.context.stage.check_area_intact(anchor, footprint) {
            Ok(())
        } else {
            Err(StageError::AreaNotIntact { anchor, footprint })
        }
    }

    /// Spawn a pawn with the configured default speed and health.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::AreaNotIntact`] if a footprint cell has no tile,
    /// or [`StageError::AreaOccupied`] if a pawn or facility covers one.
    pub fn spawn_pawn(&mut self, anchor: Square, footprint: Footprint) -> Result<EntityId> {
        let speed = self.context.config.robot.pawn_speed;
        let health = self.context.config.robot.pawn_health;
        self.spawn_pawn_with(anchor, footprint, speed, health)
    }

    /// Spawn a pawn with explicit speed (cells per second) and health.
    ///
    /// # Errors
    ///
    /// Same as [`spawn_pawn`](Self::spawn_pawn).
    pub fn spawn_pawn_with(
        &mut self,
        anchor: Square,
        footprint: Footprint,
        speed: Fixed,
        health: u32,
    ) -> Result<EntityId> {
        self.check_intact(anchor, footprint)?;
        if !self
            .context
            .entities
            .area_free_for(EntityId::MAX, anchor, footprint)
        {
            return Err(StageError::AreaOccupied { anchor });
        }

        let id = self.allocate_id();
        let pawn = PawnController::new(id, anchor, footprint, speed, health);
        pawn.register(&mut self.context.entities);
        self.pawns.insert(id, pawn);
        tracing::debug!(pawn = id, anchor = %anchor, "Pawn spawned");
        Ok(id)
    }

    /// Spawn a facility.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::AreaNotIntact`] if a footprint cell has no tile,
    /// or [`StageError::AreaOccupied`] if any entity covers one.
    pub fn spawn_facility(&mut self, anchor: Square, footprint: Footprint) -> Result<EntityId> {
        self.check_intact(anchor, footprint)?;
        let entities = &self.context.entities;
        let blocked = footprint.cells(anchor).any(|cell| {
            entities.pawns.is_occupied(cell)
                || entities.reserved.is_occupied(cell)
                || entities.objects.is_occupied(cell)
                || entities.facilities.is_occupied(cell)
        });
        if blocked {
            return Err(StageError::AreaOccupied { anchor });
        }

        let id = self.allocate_id();
        let facility = FacilityController::new(id, anchor, footprint);
        facility.register(&mut self.context.entities);
        self.facilities.insert(id, facility);
        tracing::debug!(facility = id, anchor = %anchor, "Facility spawned");
        Ok(id)
    }

    /// Spawn an object. Objects may share cells with pawns and other objects.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::AreaNotIntact`] if a footprint cell has no tile,
    /// or [`StageError::AreaOccupied`] if a facility covers one.
    pub fn spawn_object(&mut self, anchor: Square, footprint: Footprint) -> Result<EntityId> {
        self.check_intact(anchor, footprint)?;
        let entities = &self.context.entities;
        if footprint
            .cells(anchor)
            .any(|cell| entities.facilities.is_occupied(cell))
        {
            return Err(StageError::AreaOccupied { anchor });
        }

        let id = self.allocate_id();
        let object = ObjectController::new(id, anchor, footprint);
        object.register(&mut self.context.entities);
        self.objects.insert(id, object);
        tracing::debug!(object = id, anchor = %anchor, "Object spawned");
        Ok(id)
    }

    /// Remove a pawn, its robot and its pending path requests. A carried
    /// object is dropped where the pawn stood.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::EntityNotFound`] if the pawn doesn't exist.
    pub fn despawn_pawn(&mut self, id: EntityId) -> Result<()> {
        let pawn = self.pawns.remove(&id).ok_or(StageError::EntityNotFound {
            category: EntityCategory::Pawn,
            id,
        })?;
        if let Some(mut robot) = self.robots.remove(&id) {
            self.halt_robot(&mut robot);
        }
        pawn.unregister(&mut self.context.entities);
        self.drop_carried(&pawn);
        tracing::debug!(pawn = id, "Pawn despawned");
        Ok(())
    }

    /// Remove an object, taking it from its carrier if needed.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::EntityNotFound`] if the object doesn't exist.
    pub fn despawn_object(&mut self, id: EntityId) -> Result<()> {
        let object = self.objects.remove(&id).ok_or(StageError::EntityNotFound {
            category: EntityCategory::Object,
            id,
        })?;
        if let Some(carrier) = object.carried_by().and_then(|p| self.pawns.get_mut(&p)) {
            carrier.set_carrying(None);
        }
        object.unregister(&mut self.context.entities);
        tracing::debug!(object = id, "Object despawned");
        Ok(())
    }

    /// Remove a facility.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::EntityNotFound`] if the facility doesn't exist.
    pub fn despawn_facility(&mut self, id: EntityId) -> Result<()> {
        let facility = self
            .facilities
            .remove(&id)
            .ok_or(StageError::EntityNotFound {
                category: EntityCategory::Facility,
                id,
            })?;
        facility.unregister(&mut self.context.entities);
        tracing::debug!(facility = id, "Facility despawned");
        Ok(())
    }

    /// Halt a robot, closing its dropped operation in the event stream.
    fn halt_robot(&mut self, robot: &mut Robot) {
        if let Some(kind) = robot.halt(&mut self.context.path_finder) {
            self.events.push(StageEvent::OperationFinished {
                pawn: robot.pawn(),
                kind,
                outcome: OperationOutcome::Cancelled,
            });
        }
    }

    fn drop_carried(&mut self, pawn: &PawnController) {
        let Some(object) = pawn.carrying().and_then(|o| self.objects.get_mut(&o)) else {
            return;
        };
        object.drop_at(pawn.square(), &mut self.context.entities);
    }

    /// Attach a robot to a pawn.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::EntityNotFound`] if the pawn doesn't exist, or
    /// [`StageError::RobotAlreadyAttached`] if it already has one.
    pub fn attach_robot(&mut self, pawn: EntityId, brain: Box<dyn RobotBrain>) -> Result<()> {
        if !self.pawns.contains_key(&pawn) {
            return Err(StageError::EntityNotFound {
                category: EntityCategory::Pawn,
                id: pawn,
            });
        }
        if self.robots.contains_key(&pawn) {
            return Err(StageError::RobotAlreadyAttached(pawn));
        }
        tracing::debug!(pawn, brain = brain.name(), "Robot attached");
        self.robots.insert(pawn, Robot::new(pawn, brain));
        Ok(())
    }

    /// Attach a robot built from a serializable brain selection.
    ///
    /// # Errors
    ///
    /// Same as [`attach_robot`](Self::attach_robot).
    pub fn attach_brain(&mut self, pawn: EntityId, brain: &BrainSpec) -> Result<()> {
        let brain = brain.build(&self.context.config.robot);
        self.attach_robot(pawn, brain)
    }

    fn robot_mut(&mut self, pawn: EntityId) -> Result<&mut Robot> {
        self.robots.get_mut(&pawn).ok_or(StageError::NoRobot(pawn))
    }

    /// Queue an operation on the target pawn's robot.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::NoRobot`] if the pawn has no robot.
    pub fn request_operation(&mut self, operation: PawnOperation) -> Result<()> {
        self.robot_mut(operation.pawn)?.request_operation(operation);
        Ok(())
    }

    /// Cancel the pawn's running operation and clear its queue.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::NoRobot`] if the pawn has no robot.
    pub fn cancel_operation(&mut self, pawn: EntityId) -> Result<()> {
        let robot = self.robots.get_mut(&pawn).ok_or(StageError::NoRobot(pawn))?;
        robot.cancel_operation(&mut self.context.path_finder);
        Ok(())
    }

    /// True if the pawn's robot has nothing queued or running.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::NoRobot`] if the pawn has no robot.
    pub fn is_available(&self, pawn: EntityId) -> Result<bool> {
        self.robots
            .get(&pawn)
            .map(Robot::is_available)
            .ok_or(StageError::NoRobot(pawn))
    }

    /// Enable or disable a pawn's robot.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::NoRobot`] if the pawn has no robot.
    pub fn set_robot_active(&mut self, pawn: EntityId, active: bool) -> Result<()> {
        self.robot_mut(pawn)?.set_active(active);
        Ok(())
    }

    /// Advance the simulation by one tick.
    pub fn tick(&mut self) {
        let first_event = self.events.len();
        let dt = self.context.config.dt();
        let StageContext {
            stage,
            entities,
            path_finder,
            rng,
            config,
        } = &mut self.context;

        // 1. Robots
        for (id, robot) in &mut self.robots {
            let Some(pawn) = self.pawns.get_mut(id) else {
                continue;
            };
            if !pawn.is_alive() {
                continue;
            }
            let mut ctx = ActionContext {
                stage: &*stage,
                entities: &mut *entities,
                path_finder: &mut *path_finder,
                rng: &mut *rng,
                objects: &mut self.objects,
                facilities: &mut self.facilities,
                events: &mut self.events,
                config: &config.robot,
                dt,
            };
            robot.tick(pawn, &mut ctx);
        }

        // 2. Path finder
        path_finder.process(&StageView {
            stage: &*stage,
            entities: &*entities,
        });

        // 3. Damage and deaths
        self.apply_damage_events(first_event);

        self.tick += 1;

        #[cfg(debug_assertions)]
        {
            let hash = self.state_hash();
            tracing::trace!(tick = self.tick, state_hash = hash, "Simulation state hash");
        }
    }

    /// Run `ticks` ticks.
    pub fn run_ticks(&mut self, ticks: u64) {
        for _ in 0..ticks {
            self.tick();
        }
    }

    /// Tick until every robot is available and no path request is queued.
    /// Returns the ticks taken, or `None` if `max_ticks` ran out first.
    pub fn run_until_idle(&mut self, max_ticks: u64) -> Option<u64> {
        for elapsed in 0..=max_ticks {
            let idle = self.context.path_finder.pending() == 0
                && self.robots.values().all(Robot::is_available);
            if idle {
                return Some(elapsed);
            }
            if elapsed < max_ticks {
                self.tick();
            }
        }
        None
    }

    /// True once no robot will act again without an external request: every
    /// robot is settled and no path request is queued.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.context.path_finder.pending() == 0 && self.robots.values().all(Robot::is_settled)
    }

    fn apply_damage_events(&mut self, first_event: usize) {
        let mut hits: Vec<(EntityId, u32)> = Vec::new();
        for event in &self.events[first_event..] {
            match event {
                StageEvent::Attacked { target, damage, .. } => hits.push((*target, *damage)),
                StageEvent::Strike {
                    victims, damage, ..
                } => hits.extend(victims.iter().map(|&victim| (victim, *damage))),
                _ => {}
            }
        }

        for (target, damage) in hits {
            let killed = self
                .pawns
                .get_mut(&target)
                .is_some_and(|pawn| pawn.apply_damage(damage));
            if killed {
                self.handle_death(target);
            }
        }
    }

    fn handle_death(&mut self, id: EntityId) {
        if let Some(mut robot) = self.robots.remove(&id) {
            self.halt_robot(&mut robot);
            self.robots.insert(id, robot);
        }
        if let Some(pawn) = self.pawns.get(&id).cloned() {
            pawn.unregister(&mut self.context.entities);
            self.drop_carried(&pawn);
            if let Some(dead) = self.pawns.get_mut(&id) {
                dead.set_carrying(None);
            }
        }
        tracing::debug!(pawn = id, tick = self.tick, "Pawn died");
        self.events.push(StageEvent::PawnDied { pawn: id });
    }

    /// Calculate a hash of the current simulation state.
    ///
    /// Two simulations fed the same config, spawns and requests produce the
    /// same hash on every tick.
    #[must_use]
    pub fn state_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.tick.hash(&mut hasher);

        self.pawns.len().hash(&mut hasher);
        for pawn in self.pawns.values() {
            pawn.id().hash(&mut hasher);
            pawn.square().hash(&mut hasher);
            pawn.position().x.to_bits().hash(&mut hasher);
            pawn.position().y.to_bits().hash(&mut hasher);
            pawn.health().hash(&mut hasher);
            pawn.state().hash(&mut hasher);
            pawn.carrying().hash(&mut hasher);
        }

        self.objects.len().hash(&mut hasher);
        for object in self.objects.values() {
            object.id().hash(&mut hasher);
            object.square().hash(&mut hasher);
            object.carried_by().hash(&mut hasher);
            object.collected().hash(&mut hasher);
        }

        self.facilities.len().hash(&mut hasher);
        for facility in self.facilities.values() {
            facility.id().hash(&mut hasher);
            facility.square().hash(&mut hasher);
            facility.produced().hash(&mut hasher);
        }

        for (id, robot) in &self.robots {
            id.hash(&mut hasher);
            robot.state().hash(&mut hasher);
            robot.current_operation().map(|o| o.kind).hash(&mut hasher);
        }

        hasher.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::{IdleBrain, ScriptedBrain};
    use crate::events::StrikeKind;
    use crate::operation::OperationKind;

    fn open_sim(width: u32, height: u32) -> StageSimulation {
        let config = SimulationConfig::default().with_robot(RobotConfig::default().instant_actions());
        StageSimulation::with_stage(StageData::rectangle(width, height), config)
    }

    fn sq(x: i32, y: i32) -> Square {
        Square::new(x, y)
    }

    #[test]
    fn test_spawn_rejects_missing_tiles_and_occupied_area() {
        let mut sim = open_sim(4, 4);
        assert!(matches!(
            sim.spawn_pawn(sq(3, 3), Footprint::new(2, 1)),
            Err(StageError::AreaNotIntact { .. })
        ));

        sim.spawn_facility(sq(1, 1), Footprint::new(2, 2)).unwrap();
        assert!(matches!(
            sim.spawn_pawn(sq(2, 2), Footprint::UNIT),
            Err(StageError::AreaOccupied { .. })
        ));
        assert!(matches!(
            sim.spawn_object(sq(1, 2), Footprint::UNIT),
            Err(StageError::AreaOccupied { .. })
        ));

        let pawn = sim.spawn_pawn(sq(0, 0), Footprint::UNIT).unwrap();
        assert!(sim.spawn_object(sq(0, 0), Footprint::UNIT).is_ok());
        assert!(matches!(
            sim.spawn_pawn(sq(0, 0), Footprint::UNIT),
            Err(StageError::AreaOccupied { .. })
        ));
        assert_eq!(sim.entities().pawns.anchor(pawn), Some(sq(0, 0)));
    }

    #[test]
    fn test_despawn_unregisters_and_errors_on_unknown() {
        let mut sim = open_sim(4, 4);
        let pawn = sim.spawn_pawn(sq(1, 1), Footprint::UNIT).unwrap();
        sim.attach_robot(pawn, Box::new(IdleBrain)).unwrap();

        sim.despawn_pawn(pawn).unwrap();
        assert!(sim.entities().pawns.is_empty());
        assert!(sim.robot(pawn).is_none());
        assert!(matches!(
            sim.despawn_pawn(pawn),
            Err(StageError::EntityNotFound {
                category: EntityCategory::Pawn,
                ..
            })
        ));
    }

    #[test]
    fn test_robot_api_errors() {
        let mut sim = open_sim(4, 4);
        let pawn = sim.spawn_pawn(sq(0, 0), Footprint::UNIT).unwrap();
        assert!(matches!(
            sim.request_operation(PawnOperation::new(pawn, OperationKind::Think)),
            Err(StageError::NoRobot(_))
        ));
        assert!(matches!(sim.is_available(pawn), Err(StageError::NoRobot(_))));

        sim.attach_robot(pawn, Box::new(IdleBrain)).unwrap();
        assert!(matches!(
            sim.attach_robot(pawn, Box::new(IdleBrain)),
            Err(StageError::RobotAlreadyAttached(_))
        ));
        assert!(sim.is_available(pawn).unwrap());
        assert!(sim.attach_robot(99, Box::new(IdleBrain)).is_err());
    }

    #[test]
    fn test_attack_kills_and_unregisters_target() {
        let mut sim = open_sim(4, 4);
        let attacker = sim.spawn_pawn(sq(0, 0), Footprint::UNIT).unwrap();
        let target = sim
            .spawn_pawn_with(sq(1, 0), Footprint::UNIT, Fixed::from_num(4), 3)
            .unwrap();
        sim.attach_robot(attacker, Box::new(IdleBrain)).unwrap();
        sim.attach_robot(target, Box::new(IdleBrain)).unwrap();
        sim.request_operation(PawnOperation::new(
            attacker,
            OperationKind::Attack { target },
        ))
        .unwrap();

        sim.run_ticks(3);

        let events = sim.drain_events();
        assert!(events.contains(&StageEvent::PawnDied { pawn: target }));
        assert!(!sim.pawn(target).unwrap().is_alive());
        assert!(!sim.entities().pawns.is_registered(target));
        assert!(!sim.robot(target).unwrap().is_active());
    }

    #[test]
    fn test_attack_out_of_reach_is_noop() {
        let mut sim = open_sim(6, 1);
        let attacker = sim.spawn_pawn(sq(0, 0), Footprint::UNIT).unwrap();
        let target = sim.spawn_pawn(sq(5, 0), Footprint::UNIT).unwrap();
        sim.attach_robot(attacker, Box::new(IdleBrain)).unwrap();
        sim.request_operation(PawnOperation::new(
            attacker,
            OperationKind::Attack { target },
        ))
        .unwrap();
        sim.run_ticks(3);

        assert_eq!(sim.pawn(target).unwrap().health(), 10);
        assert!(sim.is_available(attacker).unwrap());
    }

    #[test]
    fn test_meteor_hits_neighbours_but_not_caster() {
        let mut sim = open_sim(6, 6);
        let caster = sim.spawn_pawn(sq(0, 0), Footprint::UNIT).unwrap();
        let near = sim.spawn_pawn(sq(2, 2), Footprint::UNIT).unwrap();
        let edge = sim.spawn_pawn(sq(3, 3), Footprint::UNIT).unwrap();
        let far = sim.spawn_pawn(sq(5, 5), Footprint::UNIT).unwrap();
        sim.attach_robot(caster, Box::new(IdleBrain)).unwrap();
        sim.request_operation(PawnOperation::new(
            caster,
            OperationKind::Meteor { at: sq(2, 2) },
        ))
        .unwrap();
        sim.run_ticks(3);

        let strike = sim
            .drain_events()
            .into_iter()
            .find(|e| matches!(e, StageEvent::Strike { .. }));
        assert_eq!(
            strike,
            Some(StageEvent::Strike {
                pawn: caster,
                kind: StrikeKind::Meteor,
                at: sq(2, 2),
                victims: vec![near, edge],
                damage: 8,
            })
        );
        assert_eq!(sim.pawn(near).unwrap().health(), 2);
        assert_eq!(sim.pawn(far).unwrap().health(), 10);
        assert_eq!(sim.pawn(caster).unwrap().health(), 10);
    }

    #[test]
    fn test_carry_and_put_down() {
        let mut sim = open_sim(5, 5);
        let pawn = sim.spawn_pawn(sq(1, 1), Footprint::UNIT).unwrap();
        let object = sim.spawn_object(sq(2, 1), Footprint::UNIT).unwrap();
        sim.attach_robot(pawn, Box::new(IdleBrain)).unwrap();

        sim.request_operation(PawnOperation::new(pawn, OperationKind::CarryOn { object }))
            .unwrap();
        sim.run_ticks(3);
        assert_eq!(sim.pawn(pawn).unwrap().carrying(), Some(object));
        assert!(!sim.entities().objects.is_registered(object));

        sim.request_operation(PawnOperation::new(
            pawn,
            OperationKind::PutDown { at: Some(sq(0, 1)) },
        ))
        .unwrap();
        sim.run_ticks(3);
        assert_eq!(sim.pawn(pawn).unwrap().carrying(), None);
        assert_eq!(sim.entities().objects.anchor(object), Some(sq(0, 1)));
    }

    #[test]
    fn test_despawn_drops_carried_object() {
        let mut sim = open_sim(5, 5);
        let pawn = sim.spawn_pawn(sq(1, 1), Footprint::UNIT).unwrap();
        let object = sim.spawn_object(sq(1, 2), Footprint::UNIT).unwrap();
        sim.attach_robot(pawn, Box::new(IdleBrain)).unwrap();
        sim.request_operation(PawnOperation::new(pawn, OperationKind::CarryOn { object }))
            .unwrap();
        sim.run_ticks(3);

        sim.despawn_pawn(pawn).unwrap();
        assert_eq!(sim.object(object).unwrap().carried_by(), None);
        assert_eq!(sim.entities().objects.anchor(object), Some(sq(1, 1)));
    }

    fn timed_sim() -> StageSimulation {
        StageSimulation::with_stage(StageData::rectangle(4, 4), SimulationConfig::default())
    }

    fn started_and_finished(events: &[StageEvent], pawn: EntityId) -> (usize, usize) {
        let started = events
            .iter()
            .filter(|e| matches!(e, StageEvent::OperationStarted { pawn: p, .. } if *p == pawn))
            .count();
        let finished = events
            .iter()
            .filter(|e| matches!(e, StageEvent::OperationFinished { pawn: p, .. } if *p == pawn))
            .count();
        (started, finished)
    }

    #[test]
    fn test_despawn_closes_running_operation() {
        let mut sim = timed_sim();
        let pawn = sim.spawn_pawn(sq(1, 1), Footprint::UNIT).unwrap();
        sim.attach_robot(pawn, Box::new(IdleBrain)).unwrap();
        sim.request_operation(PawnOperation::new(pawn, OperationKind::Freeze))
            .unwrap();
        sim.run_ticks(3);
        assert!(sim.robot(pawn).unwrap().current_operation().is_some());

        sim.despawn_pawn(pawn).unwrap();

        let events = sim.drain_events();
        assert_eq!(
            events.last(),
            Some(&StageEvent::OperationFinished {
                pawn,
                kind: OperationKind::Freeze,
                outcome: OperationOutcome::Cancelled,
            })
        );
        assert_eq!(started_and_finished(&events, pawn), (1, 1));
    }

    #[test]
    fn test_death_closes_victim_operation_before_dying() {
        let mut sim = timed_sim();
        let attacker = sim.spawn_pawn(sq(0, 0), Footprint::UNIT).unwrap();
        let victim = sim
            .spawn_pawn_with(sq(1, 0), Footprint::UNIT, Fixed::from_num(4), 3)
            .unwrap();
        sim.attach_robot(attacker, Box::new(IdleBrain)).unwrap();
        sim.attach_robot(victim, Box::new(IdleBrain)).unwrap();
        sim.request_operation(PawnOperation::new(victim, OperationKind::Freeze))
            .unwrap();
        sim.request_operation(PawnOperation::new(
            attacker,
            OperationKind::Attack { target: victim },
        ))
        .unwrap();

        sim.run_ticks(20);

        let events = sim.drain_events();
        let cancelled = events.iter().position(|e| {
            *e == StageEvent::OperationFinished {
                pawn: victim,
                kind: OperationKind::Freeze,
                outcome: OperationOutcome::Cancelled,
            }
        });
        let died = events
            .iter()
            .position(|e| *e == StageEvent::PawnDied { pawn: victim });
        assert!(cancelled.is_some());
        assert!(cancelled < died);
        assert_eq!(started_and_finished(&events, victim), (1, 1));
    }

    #[test]
    fn test_collect_and_produce_count() {
        let mut sim = open_sim(5, 5);
        let pawn = sim.spawn_pawn(sq(2, 2), Footprint::UNIT).unwrap();
        let object = sim.spawn_object(sq(2, 2), Footprint::UNIT).unwrap();
        let facility = sim.spawn_facility(sq(3, 3), Footprint::new(2, 2)).unwrap();
        sim.attach_robot(pawn, Box::new(IdleBrain)).unwrap();
        sim.request_operation(PawnOperation::new(pawn, OperationKind::Collect { object }))
            .unwrap();
        sim.request_operation(PawnOperation::new(pawn, OperationKind::Produce { facility }))
            .unwrap();

        assert!(sim.run_until_idle(20).is_some());
        assert_eq!(sim.object(object).unwrap().collected(), 1);
        assert_eq!(sim.facility(facility).unwrap().produced(), 1);
    }

    #[test]
    fn test_state_hash_is_deterministic() {
        let build = || {
            let mut sim = StageSimulation::new(
                SimulationConfig::default()
                    .with_stage(StageConfig::open(12, 12).with_holes_per_mille(100))
                    .with_seed(9),
            );
            for x in [0, 5, 10] {
                if let Ok(pawn) = sim.spawn_pawn(sq(x, x), Footprint::UNIT) {
                    sim.attach_brain(pawn, &BrainSpec::Wander).unwrap();
                }
            }
            sim
        };

        let mut a = build();
        let mut b = build();
        for _ in 0..200 {
            a.tick();
            b.tick();
            assert_eq!(a.state_hash(), b.state_hash());
        }
        assert_eq!(a.drain_events(), b.drain_events());
    }

    #[test]
    fn test_settled_waits_for_script_to_run_out() {
        let mut sim = open_sim(4, 4);
        let pawn = sim.spawn_pawn(sq(0, 0), Footprint::UNIT).unwrap();
        sim.attach_robot(
            pawn,
            Box::new(ScriptedBrain::new([OperationKind::Happy, OperationKind::Think])),
        )
        .unwrap();
        assert!(sim.is_available(pawn).unwrap());
        assert!(!sim.is_settled());

        sim.run_ticks(30);
        assert!(sim.is_settled());
        assert_eq!(
            sim.events()
                .iter()
                .filter(|e| matches!(e, StageEvent::Emote { .. }))
                .count(),
            2
        );
    }

    #[test]
    fn test_dt_follows_tick_rate() {
        let config = SimulationConfig {
            tick_rate: 4,
            ..SimulationConfig::default()
        };
        assert_eq!(config.dt(), Fixed::from_num(0.25));
        let zero = SimulationConfig {
            tick_rate: 0,
            ..SimulationConfig::default()
        };
        assert_eq!(zero.dt(), Fixed::ONE);
    }
}
