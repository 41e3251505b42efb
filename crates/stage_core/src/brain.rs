//! Decision hooks plugged into a robot.
//!
//! A [`RobotBrain`] customises the robot's state machine without subclassing
//! it: the robot owns the states and calls the hooks at fixed points.

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::controller::PawnController;
use crate::entity_index::StageEntityData;
use crate::math::Fixed;
use crate::operation::{OperationKind, OperationQueue, PawnOperation};
use crate::pathfinding::{stage_walkable, StageView};
use crate::robot::{RobotConfig, RobotState};
use crate::stage::StageData;
use crate::stage_generation::StageRng;
use crate::task::Countdown;

/// Snapshot of the robot handed to [`RobotBrain::can_decide`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RobotStatus {
    /// An operation is in flight.
    pub busy: bool,
    /// Operations waiting in the queue.
    pub queued: usize,
}

/// What a brain may read and enqueue while deciding.
pub struct DecisionContext<'a> {
    pawn: &'a PawnController,
    stage: &'a StageData,
    entities: &'a StageEntityData,
    rng: &'a mut StageRng,
    queue: &'a mut OperationQueue,
    enqueued: usize,
}

impl fmt::Debug for DecisionContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecisionContext")
            .field("pawn", &self.pawn.id())
            .field("enqueued", &self.enqueued)
            .finish_non_exhaustive()
    }
}

impl<'a> DecisionContext<'a> {
    /// Bundle the decision inputs.
    pub fn new(
        pawn: &'a PawnController,
        stage: &'a StageData,
        entities: &'a StageEntityData,
        rng: &'a mut StageRng,
        queue: &'a mut OperationQueue,
    ) -> Self {
        Self {
            pawn,
            stage,
            entities,
            rng,
            queue,
            enqueued: 0,
        }
    }

    /// The deciding pawn.
    #[must_use]
    pub fn pawn(&self) -> &PawnController {
        self.pawn
    }

    /// Tile set.
    #[must_use]
    pub fn stage(&self) -> &StageData {
        self.stage
    }

    /// Live occupancy.
    #[must_use]
    pub fn entities(&self) -> &StageEntityData {
        self.entities
    }

    /// Read-only view for walkability checks.
    #[must_use]
    pub fn view(&self) -> StageView<'_> {
        StageView {
            stage: self.stage,
            entities: self.entities,
        }
    }

    /// Deterministic RNG.
    pub fn rng(&mut self) -> &mut StageRng {
        self.rng
    }

    /// Queue a non-priority operation for this pawn.
    pub fn enqueue(&mut self, kind: OperationKind) {
        self.queue.push(PawnOperation::new(self.pawn.id(), kind));
        self.enqueued += 1;
    }

    /// Queue a priority operation for this pawn.
    pub fn enqueue_priority(&mut self, kind: OperationKind) {
        self.queue.push(PawnOperation::priority(self.pawn.id(), kind));
        self.enqueued += 1;
    }

    /// Operations enqueued through this context.
    #[must_use]
    pub fn enqueued(&self) -> usize {
        self.enqueued
    }

    /// Operations waiting in the robot's queue.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queue.len()
    }
}

/// Hooks called by a robot's state machine.
pub trait RobotBrain: fmt::Debug {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Called after the robot enters `state`.
    fn on_enter(&mut self, _state: RobotState) {}

    /// Called before the robot leaves `state`.
    fn on_exit(&mut self, _state: RobotState) {}

    /// Polled every tick while waiting. True moves the robot to thinking.
    fn can_decide(&mut self, status: RobotStatus, dt: Fixed) -> bool;

    /// True skips this decision and returns to waiting.
    fn veto_decision(&mut self, _ctx: &DecisionContext<'_>) -> bool {
        false
    }

    /// Enqueue at least one operation.
    fn decide(&mut self, ctx: &mut DecisionContext<'_>);

    /// Called after [`decide`](Self::decide).
    fn after_decide(&mut self, _ctx: &DecisionContext<'_>) {}

    /// True while the brain still means to decide something on its own.
    fn has_plans(&self) -> bool {
        true
    }
}

/// Walks to random reachable tiles, pausing between decisions.
#[derive(Debug, Clone)]
pub struct WanderBrain {
    cooldown: Countdown,
    attempts: u32,
}

impl WanderBrain {
    /// Decide every `cooldown` seconds, sampling up to `attempts` tiles.
    #[must_use]
    pub fn new(cooldown: Fixed, attempts: u32) -> Self {
        Self {
            cooldown: Countdown::new(cooldown),
            attempts: attempts.max(1),
        }
    }
}

impl RobotBrain for WanderBrain {
    fn name(&self) -> &'static str {
        "wander"
    }

    fn on_exit(&mut self, state: RobotState) {
        if state == RobotState::Waiting {
            self.cooldown.reset();
        }
    }

    fn can_decide(&mut self, status: RobotStatus, dt: Fixed) -> bool {
        if status.busy || status.queued > 0 {
            return false;
        }
        self.cooldown.tick(dt)
    }

    fn decide(&mut self, ctx: &mut DecisionContext<'_>) {
        let pawn = ctx.pawn().id();
        let here = ctx.pawn().square();
        let footprint = ctx.pawn().footprint();
        for _ in 0..self.attempts {
            let Some(candidate) = ctx.stage.random_tile_coord(ctx.rng) else {
                break;
            };
            if candidate != here && stage_walkable(&ctx.view(), pawn, candidate, footprint) {
                ctx.enqueue(OperationKind::MoveTo {
                    target: Some(candidate),
                });
                return;
            }
        }
        ctx.enqueue(OperationKind::Think);
    }
}

/// Plays a fixed list of operations, one per decision.
#[derive(Debug, Clone, Default)]
pub struct ScriptedBrain {
    script: VecDeque<OperationKind>,
}

impl ScriptedBrain {
    /// Play `script` in order.
    #[must_use]
    pub fn new(script: impl IntoIterator<Item = OperationKind>) -> Self {
        Self {
            script: script.into_iter().collect(),
        }
    }

    /// Operations not yet played.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.script.len()
    }
}

impl RobotBrain for ScriptedBrain {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn can_decide(&mut self, status: RobotStatus, _dt: Fixed) -> bool {
        !self.script.is_empty() && !status.busy && status.queued == 0
    }

    fn decide(&mut self, ctx: &mut DecisionContext<'_>) {
        let kind = self.script.pop_front().unwrap_or(OperationKind::Think);
        ctx.enqueue(kind);
    }

    fn has_plans(&self) -> bool {
        !self.script.is_empty()
    }
}

/// Never decides; the robot only runs externally requested operations.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdleBrain;

impl RobotBrain for IdleBrain {
    fn name(&self) -> &'static str {
        "idle"
    }

    fn can_decide(&mut self, _status: RobotStatus, _dt: Fixed) -> bool {
        false
    }

    fn decide(&mut self, ctx: &mut DecisionContext<'_>) {
        ctx.enqueue(OperationKind::Think);
    }

    fn has_plans(&self) -> bool {
        false
    }
}

/// Serializable brain selection for scenarios.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BrainSpec {
    /// [`IdleBrain`].
    #[default]
    Idle,
    /// [`WanderBrain`] tuned by [`RobotConfig`].
    Wander,
    /// [`ScriptedBrain`] with the given operations.
    Scripted(Vec<OperationKind>),
}

impl BrainSpec {
    /// Build the brain.
    #[must_use]
    pub fn build(&self, config: &RobotConfig) -> Box<dyn RobotBrain> {
        match self {
            Self::Idle => Box::new(IdleBrain),
            Self::Wander => Box::new(WanderBrain::new(
                config.decision_cooldown,
                config.wander_attempts,
            )),
            Self::Scripted(script) => Box::new(ScriptedBrain::new(script.iter().copied())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::square::{Footprint, Square};

    fn fixed(value: f64) -> Fixed {
        Fixed::from_num(value)
    }

    const IDLE: RobotStatus = RobotStatus {
        busy: false,
        queued: 0,
    };

    #[test]
    fn test_wander_waits_for_cooldown_and_idle_robot() {
        let mut brain = WanderBrain::new(fixed(0.5), 4);
        assert!(!brain.can_decide(IDLE, fixed(0.25)));
        assert!(!brain.can_decide(
            RobotStatus {
                busy: true,
                queued: 0
            },
            fixed(1.0)
        ));
        assert!(brain.can_decide(IDLE, fixed(0.25)));

        brain.on_exit(RobotState::Waiting);
        assert!(!brain.can_decide(IDLE, fixed(0.25)));
    }

    #[test]
    fn test_wander_enqueues_walkable_move() {
        let stage = StageData::rectangle(4, 4);
        let entities = StageEntityData::new();
        let pawn = PawnController::new(1, Square::ZERO, Footprint::UNIT, fixed(4.0), 10);
        let mut rng = StageRng::new(3);
        let mut queue = OperationQueue::new();

        let mut brain = WanderBrain::new(fixed(1.0), 8);
        let mut ctx = DecisionContext::new(&pawn, &stage, &entities, &mut rng, &mut queue);
        brain.decide(&mut ctx);
        assert_eq!(ctx.enqueued(), 1);

        let op = queue.pop().expect("one operation");
        assert_eq!(op.pawn, 1);
        match op.kind {
            OperationKind::MoveTo {
                target: Some(target),
            } => {
                assert_ne!(target, Square::ZERO);
                assert!(stage.check_tile_exist(target));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_wander_falls_back_to_think_on_single_tile() {
        let stage = StageData::rectangle(1, 1);
        let entities = StageEntityData::new();
        let pawn = PawnController::new(1, Square::ZERO, Footprint::UNIT, fixed(4.0), 10);
        let mut rng = StageRng::new(3);
        let mut queue = OperationQueue::new();

        let mut brain = WanderBrain::new(fixed(1.0), 3);
        let mut ctx = DecisionContext::new(&pawn, &stage, &entities, &mut rng, &mut queue);
        brain.decide(&mut ctx);
        assert_eq!(queue.pop().map(|o| o.kind), Some(OperationKind::Think));
    }

    #[test]
    fn test_scripted_plays_in_order() {
        let mut brain = ScriptedBrain::new([OperationKind::Happy, OperationKind::Freeze]);
        assert!(brain.can_decide(IDLE, Fixed::ZERO));
        assert!(brain.has_plans());

        let stage = StageData::rectangle(2, 2);
        let entities = StageEntityData::new();
        let pawn = PawnController::new(4, Square::ZERO, Footprint::UNIT, fixed(4.0), 10);
        let mut rng = StageRng::new(0);
        let mut queue = OperationQueue::new();
        let mut ctx = DecisionContext::new(&pawn, &stage, &entities, &mut rng, &mut queue);
        brain.decide(&mut ctx);
        brain.decide(&mut ctx);

        assert_eq!(brain.remaining(), 0);
        assert!(!brain.can_decide(IDLE, Fixed::ZERO));
        assert!(!brain.has_plans());
        let kinds: Vec<_> = queue.iter().map(|o| o.kind).collect();
        assert_eq!(kinds, vec![OperationKind::Happy, OperationKind::Freeze]);
    }

    #[test]
    fn test_brain_spec_builds_named_brains() {
        let config = RobotConfig::default();
        assert_eq!(BrainSpec::Idle.build(&config).name(), "idle");
        assert_eq!(BrainSpec::Wander.build(&config).name(), "wander");
        assert!(!BrainSpec::Idle.build(&config).has_plans());
        assert!(BrainSpec::Wander.build(&config).has_plans());
        assert_eq!(
            BrainSpec::Scripted(vec![OperationKind::Think])
                .build(&config)
                .name(),
            "scripted"
        );
    }
}
