//! Per-entity controllers.
//!
//! A controller owns the positional and gameplay state of one spawned
//! entity and keeps the occupancy index in step with it. Robots drive pawn
//! controllers through the movement and action primitives below; facilities
//! and objects only ever sit idle.

use serde::{Deserialize, Serialize};

use crate::entity_index::{EntityCategory, EntityId, StageEntityData};
use crate::fsm::StateMachine;
use crate::math::{Fixed, Vec2Fixed};
use crate::square::{Footprint, Square};
use crate::task::Countdown;

/// Pawn controller states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PawnState {
    /// Standing still.
    Idle,
    /// Busy with a timed action.
    Wait,
    /// Walking between two cells.
    Move,
    /// Health reached zero. Terminal.
    Dead,
}

impl PawnState {
    /// Animation clip the rendering side should play.
    #[must_use]
    pub const fn animation_key(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Wait => "wait",
            Self::Move => "move",
            Self::Dead => "dead",
        }
    }
}

/// One interpolated step towards a single cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveStep {
    from: Vec2Fixed,
    to: Square,
    countdown: Countdown,
}

impl MoveStep {
    /// Step from `from` to the centre of `to` at `speed` cells per second.
    ///
    /// A non-positive speed arrives instantly.
    #[must_use]
    pub fn new(from: Vec2Fixed, to: Square, speed: Fixed) -> Self {
        let distance = from.distance(to.to_world());
        let duration = if speed > Fixed::ZERO {
            distance.saturating_div(speed)
        } else {
            Fixed::ZERO
        };
        Self {
            from,
            to,
            countdown: Countdown::new(duration),
        }
    }

    /// Destination cell.
    #[must_use]
    pub fn target(&self) -> Square {
        self.to
    }

    /// Advance by `dt` and return the interpolated position and whether the
    /// step is finished.
    pub fn advance(&mut self, dt: Fixed) -> (Vec2Fixed, bool) {
        let done = self.countdown.tick(dt);
        if done {
            return (self.to.to_world(), true);
        }
        (
            self.from.lerp(self.to.to_world(), self.countdown.progress()),
            false,
        )
    }
}

/// Controller for a mobile pawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PawnController {
    id: EntityId,
    square: Square,
    position: Vec2Fixed,
    footprint: Footprint,
    speed: Fixed,
    health: u32,
    max_health: u32,
    carrying: Option<EntityId>,
    fsm: StateMachine<PawnState>,
    step: Option<MoveStep>,
}

impl PawnController {
    /// Create a pawn standing on `square`.
    #[must_use]
    pub fn new(
        id: EntityId,
        square: Square,
        footprint: Footprint,
        speed: Fixed,
        health: u32,
    ) -> Self {
        Self {
            id,
            square,
            position: square.to_world(),
            footprint,
            speed,
            health,
            max_health: health,
            carrying: None,
            fsm: StateMachine::new(PawnState::Idle),
            step: None,
        }
    }

    /// Entity id.
    #[must_use]
    pub fn id(&self) -> EntityId {
        self.id
    }

    /// Logical anchor cell. Only changes when a step snaps.
    #[must_use]
    pub fn square(&self) -> Square {
        self.square
    }

    /// Interpolated world position.
    #[must_use]
    pub fn position(&self) -> Vec2Fixed {
        self.position
    }

    /// Occupied area.
    #[must_use]
    pub fn footprint(&self) -> Footprint {
        self.footprint
    }

    /// Cells per second.
    #[must_use]
    pub fn speed(&self) -> Fixed {
        self.speed
    }

    /// Current health.
    #[must_use]
    pub fn health(&self) -> u32 {
        self.health
    }

    /// Health at spawn.
    #[must_use]
    pub fn max_health(&self) -> u32 {
        self.max_health
    }

    /// Object currently carried.
    #[must_use]
    pub fn carrying(&self) -> Option<EntityId> {
        self.carrying
    }

    /// Active controller state.
    #[must_use]
    pub fn state(&self) -> PawnState {
        self.fsm.current()
    }

    /// Animation clip for the active state.
    #[must_use]
    pub fn animation_key(&self) -> &'static str {
        self.fsm.current().animation_key()
    }

    /// True until health reaches zero.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        !self.fsm.is(PawnState::Dead)
    }

    /// True while a step is in progress.
    #[must_use]
    pub fn is_moving(&self) -> bool {
        self.step.is_some()
    }

    /// True if the world position sits exactly on `square`'s centre.
    #[must_use]
    pub fn stands_on(&self, square: Square) -> bool {
        self.step.is_none() && self.position == square.to_world()
    }

    /// Add this pawn to the occupancy index.
    pub fn register(&self, entities: &mut StageEntityData) -> bool {
        entities.register(EntityCategory::Pawn, self.id, self.square, self.footprint)
    }

    /// Remove this pawn and its step reservation from the occupancy index.
    pub fn unregister(&self, entities: &mut StageEntityData) {
        entities.unregister(EntityCategory::Pawn, self.id);
        entities.release(self.id);
    }

    /// Start walking towards `target`, reserving its area until the step
    /// ends. Replaces any step in progress.
    pub fn begin_move(&mut self, target: Square, entities: &mut StageEntityData) {
        if !self.is_alive() {
            return;
        }
        entities.reserve(self.id, target, self.footprint);
        self.step = Some(MoveStep::new(self.position, target, self.speed));
        self.fsm.transition(PawnState::Move);
    }

    /// Advance the current step by `dt`. On arrival the anchor snaps to the
    /// nearest cell, the occupancy index is updated and the reservation is
    /// released. Returns true on the tick the step finishes.
    pub fn advance_move(&mut self, dt: Fixed, entities: &mut StageEntityData) -> bool {
        self.fsm.tick();
        let Some(step) = self.step.as_mut() else {
            return false;
        };
        let (position, arrived) = step.advance(dt);
        self.position = position;
        if !arrived {
            return false;
        }

        self.step = None;
        self.square = Square::nearest(self.position);
        entities.update(EntityCategory::Pawn, self.id, self.square, self.footprint);
        entities.release(self.id);
        self.fsm.transition(PawnState::Idle);
        tracing::trace!(pawn = self.id, square = %self.square, "Step finished");
        true
    }

    /// Enter the busy state for a timed action.
    pub fn begin_action(&mut self) {
        if self.is_alive() {
            self.fsm.transition(PawnState::Wait);
        }
    }

    /// Leave the busy state.
    pub fn end_action(&mut self) {
        if self.is_alive() {
            self.fsm.transition(PawnState::Idle);
        }
    }

    /// Abandon any step or action in progress. The anchor stays on the last
    /// snapped cell.
    pub fn interrupt(&mut self, entities: &mut StageEntityData) {
        self.step = None;
        entities.release(self.id);
        if self.is_alive() {
            self.fsm.transition(PawnState::Idle);
        }
    }

    /// Take damage. Returns true if this hit killed the pawn.
    pub fn apply_damage(&mut self, amount: u32) -> bool {
        if !self.is_alive() {
            return false;
        }
        self.health = self.health.saturating_sub(amount);
        if self.health == 0 {
            self.kill();
            return true;
        }
        false
    }

    /// Enter the terminal dead state.
    pub fn kill(&mut self) {
        self.health = 0;
        self.step = None;
        self.fsm.transition(PawnState::Dead);
    }

    pub(crate) fn set_carrying(&mut self, object: Option<EntityId>) {
        self.carrying = object;
    }
}

/// Controller for a static production facility.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacilityController {
    id: EntityId,
    square: Square,
    footprint: Footprint,
    produced: u32,
}

impl FacilityController {
    /// Create a facility anchored at `square`.
    #[must_use]
    pub fn new(id: EntityId, square: Square, footprint: Footprint) -> Self {
        Self {
            id,
            square,
            footprint,
            produced: 0,
        }
    }

    /// Entity id.
    #[must_use]
    pub fn id(&self) -> EntityId {
        self.id
    }

    /// Anchor cell.
    #[must_use]
    pub fn square(&self) -> Square {
        self.square
    }

    /// Occupied area.
    #[must_use]
    pub fn footprint(&self) -> Footprint {
        self.footprint
    }

    /// Completed production runs.
    #[must_use]
    pub fn produced(&self) -> u32 {
        self.produced
    }

    /// Facilities only idle.
    #[must_use]
    pub const fn animation_key(&self) -> &'static str {
        "idle"
    }

    /// Add this facility to the occupancy index.
    pub fn register(&self, entities: &mut StageEntityData) -> bool {
        entities.register(EntityCategory::Facility, self.id, self.square, self.footprint)
    }

    /// Remove this facility from the occupancy index.
    pub fn unregister(&self, entities: &mut StageEntityData) {
        entities.unregister(EntityCategory::Facility, self.id);
    }

    pub(crate) fn record_production(&mut self) {
        self.produced = self.produced.saturating_add(1);
    }
}

/// Controller for a collectable, carryable object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectController {
    id: EntityId,
    square: Square,
    footprint: Footprint,
    carried_by: Option<EntityId>,
    collected: u32,
}

impl ObjectController {
    /// Create an object lying at `square`.
    #[must_use]
    pub fn new(id: EntityId, square: Square, footprint: Footprint) -> Self {
        Self {
            id,
            square,
            footprint,
            carried_by: None,
            collected: 0,
        }
    }

    /// Entity id.
    #[must_use]
    pub fn id(&self) -> EntityId {
        self.id
    }

    /// Anchor cell; the last drop position while carried.
    #[must_use]
    pub fn square(&self) -> Square {
        self.square
    }

    /// Occupied area.
    #[must_use]
    pub fn footprint(&self) -> Footprint {
        self.footprint
    }

    /// Pawn carrying this object.
    #[must_use]
    pub fn carried_by(&self) -> Option<EntityId> {
        self.carried_by
    }

    /// Times a pawn collected from this object.
    #[must_use]
    pub fn collected(&self) -> u32 {
        self.collected
    }

    /// Objects only idle.
    #[must_use]
    pub const fn animation_key(&self) -> &'static str {
        "idle"
    }

    /// Add this object to the occupancy index.
    pub fn register(&self, entities: &mut StageEntityData) -> bool {
        entities.register(EntityCategory::Object, self.id, self.square, self.footprint)
    }

    /// Remove this object from the occupancy index.
    pub fn unregister(&self, entities: &mut StageEntityData) {
        entities.unregister(EntityCategory::Object, self.id);
    }

    /// Lift the object off the stage.
    pub fn pick_up(&mut self, pawn: EntityId, entities: &mut StageEntityData) {
        self.unregister(entities);
        self.carried_by = Some(pawn);
    }

    /// Lay the object down at `square`.
    pub fn drop_at(&mut self, square: Square, entities: &mut StageEntityData) {
        self.square = square;
        self.carried_by = None;
        self.register(entities);
    }

    pub(crate) fn record_collection(&mut self) {
        self.collected = self.collected.saturating_add(1);
    }
}
