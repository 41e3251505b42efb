//! Per-pawn decision and execution state machine.
//!
//! A [`Robot`] cycles `Waiting -> Thinking -> Executing -> Waiting`. Its
//! [`RobotBrain`] decides what to enqueue; the robot runs queued operations
//! one at a time as tick-polled tasks. A priority operation arriving while a
//! non-priority one runs cancels the running one and starts in the same
//! tick.

use serde::{Deserialize, Serialize};

use crate::brain::{DecisionContext, RobotBrain, RobotStatus};
use crate::context::ActionContext;
use crate::controller::PawnController;
use crate::entity_index::EntityId;
use crate::events::{OperationOutcome, StageEvent};
use crate::fsm::StateMachine;
use crate::handlers::OperationTask;
use crate::math::{fixed_decimal_serde, Fixed};
use crate::operation::{OperationKind, OperationQueue, PawnOperation};
use crate::pathfinding::{MetricKind, PathFinder};
use crate::task::{CancellationToken, TaskPoll};

/// Robot states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RobotState {
    /// Idle until the brain wants to decide or work is queued.
    Waiting,
    /// Running the brain's decision.
    Thinking,
    /// Running queued operations.
    Executing,
}

/// Robot and operation tuning. Durations are in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RobotConfig {
    /// Seconds between wander decisions.
    #[serde(with = "fixed_decimal_serde")]
    pub decision_cooldown: Fixed,
    /// Tiles sampled per wander decision.
    pub wander_attempts: u32,
    /// Metric for move path requests.
    pub move_metric: MetricKind,
    /// Chebyshev distance within which a pawn can act on a target.
    pub reach: i32,
    /// Default pawn speed in cells per second.
    #[serde(with = "fixed_decimal_serde")]
    pub pawn_speed: Fixed,
    /// Default pawn health.
    pub pawn_health: u32,
    /// Collect duration.
    #[serde(with = "fixed_decimal_serde")]
    pub collect_duration: Fixed,
    /// Pick-up and put-down duration.
    #[serde(with = "fixed_decimal_serde")]
    pub carry_duration: Fixed,
    /// Produce duration.
    #[serde(with = "fixed_decimal_serde")]
    pub produce_duration: Fixed,
    /// Attack wind-up.
    #[serde(with = "fixed_decimal_serde")]
    pub attack_duration: Fixed,
    /// Think and happy emote duration.
    #[serde(with = "fixed_decimal_serde")]
    pub emote_duration: Fixed,
    /// Freeze duration.
    #[serde(with = "fixed_decimal_serde")]
    pub freeze_duration: Fixed,
    /// Thunder and meteor casting time.
    #[serde(with = "fixed_decimal_serde")]
    pub strike_duration: Fixed,
    /// Damage per attack.
    pub attack_damage: u32,
    /// Damage per thunder strike.
    pub thunder_damage: u32,
    /// Damage per meteor.
    pub meteor_damage: u32,
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self {
            decision_cooldown: Fixed::ONE,
            wander_attempts: 8,
            move_metric: MetricKind::Chebyshev,
            reach: 1,
            pawn_speed: Fixed::from_num(4),
            pawn_health: 10,
            collect_duration: Fixed::ONE,
            carry_duration: Fixed::from_num(0.5),
            produce_duration: Fixed::from_num(2),
            attack_duration: Fixed::from_num(0.5),
            emote_duration: Fixed::ONE,
            freeze_duration: Fixed::from_num(2),
            strike_duration: Fixed::ONE,
            attack_damage: 3,
            thunder_damage: 5,
            meteor_damage: 8,
        }
    }
}

impl RobotConfig {
    /// Countdown length for a timed operation. Moves are not timed.
    #[must_use]
    pub fn duration_of(&self, kind: OperationKind) -> Fixed {
        match kind {
            OperationKind::MoveTo { .. } => Fixed::ZERO,
            OperationKind::Collect { .. } => self.collect_duration,
            OperationKind::CarryOn { .. } | OperationKind::PutDown { .. } => self.carry_duration,
            OperationKind::Produce { .. } => self.produce_duration,
            OperationKind::Attack { .. } => self.attack_duration,
            OperationKind::Think | OperationKind::Happy => self.emote_duration,
            OperationKind::Freeze => self.freeze_duration,
            OperationKind::Thunder { .. } | OperationKind::Meteor { .. } => self.strike_duration,
        }
    }

    /// Set every action duration to zero.
    #[must_use]
    pub fn instant_actions(mut self) -> Self {
        self.collect_duration = Fixed::ZERO;
        self.carry_duration = Fixed::ZERO;
        self.produce_duration = Fixed::ZERO;
        self.attack_duration = Fixed::ZERO;
        self.emote_duration = Fixed::ZERO;
        self.freeze_duration = Fixed::ZERO;
        self.strike_duration = Fixed::ZERO;
        self
    }
}

#[derive(Debug)]
struct RunningOperation {
    operation: PawnOperation,
    token: CancellationToken,
    task: OperationTask,
}

/// Drives one pawn.
#[derive(Debug)]
pub struct Robot {
    pawn: EntityId,
    fsm: StateMachine<RobotState>,
    active: bool,
    queue: OperationQueue,
    running: Option<RunningOperation>,
    brain: Box<dyn RobotBrain>,
}

impl Robot {
    /// Create an active robot for `pawn`, starting in `Waiting`.
    #[must_use]
    pub fn new(pawn: EntityId, mut brain: Box<dyn RobotBrain>) -> Self {
        brain.on_enter(RobotState::Waiting);
        Self {
            pawn,
            fsm: StateMachine::new(RobotState::Waiting),
            active: true,
            queue: OperationQueue::new(),
            running: None,
            brain,
        }
    }

    /// Pawn driven by this robot.
    #[must_use]
    pub fn pawn(&self) -> EntityId {
        self.pawn
    }

    /// Active state.
    #[must_use]
    pub fn state(&self) -> RobotState {
        self.fsm.current()
    }

    /// Brain name.
    #[must_use]
    pub fn brain_name(&self) -> &'static str {
        self.brain.name()
    }

    /// Inactive robots stop deciding and starting operations.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Enable or disable the robot.
    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    /// True if nothing is queued and nothing is in flight.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.queue.is_empty() && self.running.is_none()
    }

    /// True if available and the brain has nothing left to decide, or the
    /// robot is inactive and idle.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.is_available() && (!self.active || !self.brain.has_plans())
    }

    /// Operation in flight.
    #[must_use]
    pub fn current_operation(&self) -> Option<&PawnOperation> {
        self.running.as_ref().map(|r| &r.operation)
    }

    /// Token of the operation in flight.
    #[must_use]
    pub fn current_token(&self) -> Option<&CancellationToken> {
        self.running.as_ref().map(|r| &r.token)
    }

    /// Queued operations in run order.
    pub fn queued(&self) -> impl Iterator<Item = &PawnOperation> {
        self.queue.iter()
    }

    /// Queue an operation.
    pub fn request_operation(&mut self, operation: PawnOperation) {
        tracing::debug!(
            pawn = self.pawn,
            operation = %operation.kind,
            priority = operation.priority,
            "Operation requested"
        );
        self.queue.push(operation);
    }

    /// Cancel the operation in flight, drop everything queued and withdraw
    /// the pawn's path requests.
    ///
    /// The running task observes the cancellation on its next poll.
    pub fn cancel_operation(&mut self, path_finder: &mut PathFinder) {
        if let Some(running) = &self.running {
            running.token.cancel();
        }
        self.queue.clear();
        path_finder.cancel_requests_for(self.pawn);
    }

    /// Stop for good: cancel, drop the running task and deactivate.
    /// Returns the operation that was in flight.
    pub(crate) fn halt(&mut self, path_finder: &mut PathFinder) -> Option<OperationKind> {
        self.cancel_operation(path_finder);
        let dropped = self.running.take().map(|running| running.operation.kind);
        self.active = false;
        self.change_state(RobotState::Waiting);
        dropped
    }

    /// Advance one tick.
    pub fn tick(&mut self, pawn: &mut PawnController, ctx: &mut ActionContext<'_>) {
        self.fsm.tick();
        match self.fsm.current() {
            RobotState::Waiting => self.wait(ctx),
            RobotState::Thinking => self.think(pawn, ctx),
            RobotState::Executing => self.execute(pawn, ctx),
        }
        self.poll_running(pawn, ctx);
    }

    fn status(&self) -> RobotStatus {
        RobotStatus {
            busy: self.running.is_some(),
            queued: self.queue.len(),
        }
    }

    fn change_state(&mut self, next: RobotState) {
        if let Some((from, to)) = self.fsm.transition(next) {
            self.brain.on_exit(from);
            self.brain.on_enter(to);
            tracing::debug!(pawn = self.pawn, ?from, ?to, "Robot state changed");
        }
    }

    fn wait(&mut self, ctx: &ActionContext<'_>) {
        if !self.active {
            return;
        }
        if !self.queue.is_empty() {
            self.change_state(RobotState::Executing);
        } else if self.brain.can_decide(self.status(), ctx.dt) {
            self.change_state(RobotState::Thinking);
        }
    }

    fn think(&mut self, pawn: &PawnController, ctx: &mut ActionContext<'_>) {
        if !self.active {
            self.change_state(RobotState::Waiting);
            return;
        }

        let mut decision =
            DecisionContext::new(pawn, ctx.stage, &*ctx.entities, &mut *ctx.rng, &mut self.queue);
        if self.brain.veto_decision(&decision) {
            tracing::debug!(pawn = self.pawn, brain = self.brain.name(), "Decision vetoed");
            self.change_state(RobotState::Waiting);
            return;
        }
        self.brain.decide(&mut decision);
        self.brain.after_decide(&decision);
        let enqueued = decision.enqueued();

        if enqueued == 0 {
            tracing::warn!(pawn = self.pawn, brain = self.brain.name(), "Decision enqueued nothing");
            self.change_state(RobotState::Waiting);
        } else {
            self.change_state(RobotState::Executing);
        }
    }

    fn execute(&mut self, pawn: &mut PawnController, ctx: &mut ActionContext<'_>) {
        let preempt = self.running.as_ref().is_some_and(|running| {
            !running.operation.priority && self.queue.peek().is_some_and(|next| next.priority)
        });
        if preempt {
            self.preempt(pawn, ctx);
        }

        if !self.active || (self.queue.is_empty() && self.running.is_none()) {
            self.change_state(RobotState::Waiting);
            return;
        }

        if self.running.is_none() {
            if let Some(operation) = self.queue.pop() {
                self.start(operation, ctx);
            }
        }
    }

    fn preempt(&mut self, pawn: &mut PawnController, ctx: &mut ActionContext<'_>) {
        let Some(running) = self.running.take() else {
            return;
        };
        running.token.cancel();
        pawn.interrupt(ctx.entities);
        ctx.path_finder.cancel_requests_for(self.pawn);
        tracing::debug!(
            pawn = self.pawn,
            operation = %running.operation.kind,
            "Operation preempted"
        );
        ctx.emit(StageEvent::OperationFinished {
            pawn: self.pawn,
            kind: running.operation.kind,
            outcome: OperationOutcome::Preempted,
        });
    }

    fn start(&mut self, operation: PawnOperation, ctx: &mut ActionContext<'_>) {
        tracing::debug!(pawn = self.pawn, operation = %operation.kind, "Operation started");
        ctx.emit(StageEvent::OperationStarted {
            pawn: self.pawn,
            kind: operation.kind,
        });
        self.running = Some(RunningOperation {
            operation,
            token: CancellationToken::new(),
            task: OperationTask::start(operation.kind, ctx.config),
        });
    }

    fn poll_running(&mut self, pawn: &mut PawnController, ctx: &mut ActionContext<'_>) {
        let Some(running) = self.running.as_mut() else {
            return;
        };
        let poll = running.task.poll(pawn, ctx, &running.token);
        if !poll.is_finished() {
            return;
        }

        let outcome = if poll == TaskPoll::Cancelled {
            OperationOutcome::Cancelled
        } else {
            OperationOutcome::Completed
        };
        tracing::debug!(
            pawn = self.pawn,
            operation = %running.operation.kind,
            ?outcome,
            "Operation finished"
        );
        ctx.emit(StageEvent::OperationFinished {
            pawn: self.pawn,
            kind: running.operation.kind,
            outcome,
        });
        self.running = None;
    }
}
