//! Tick-driven operation handlers.
//!
//! Each [`OperationKind`] maps to a small state machine polled once per tick
//! by the owning robot. Handlers observe their cancellation token at every
//! yield point. Invalid arguments (unknown entity, out of reach, nothing
//! carried) turn the operation into a silent no-op.

use std::cell::RefCell;
use std::rc::Rc;

use crate::context::ActionContext;
use crate::controller::PawnController;
use crate::entity_index::EntityId;
use crate::events::{EmoteKind, StageEvent, StrikeKind};
use crate::math::Fixed;
use crate::operation::OperationKind;
use crate::pathfinding::{stage_walkable, PathRequest, PathState};
use crate::robot::RobotConfig;
use crate::square::{Footprint, Square};
use crate::task::{CancellationToken, Countdown, TaskPoll};

/// Running handler for one operation.
#[derive(Debug)]
pub(crate) enum OperationTask {
    /// Completes on the first poll.
    Instant,
    /// Path request followed by per-waypoint steps.
    Move(MoveTask),
    /// Countdown followed by an effect.
    Timed(TimedTask),
}

impl OperationTask {
    pub(crate) fn start(kind: OperationKind, config: &RobotConfig) -> Self {
        match kind {
            OperationKind::MoveTo { target: None } => Self::Instant,
            OperationKind::MoveTo {
                target: Some(target),
            } => Self::Move(MoveTask::new(target)),
            other => Self::Timed(TimedTask::new(other, config.duration_of(other))),
        }
    }

    pub(crate) fn poll(
        &mut self,
        pawn: &mut PawnController,
        ctx: &mut ActionContext<'_>,
        token: &CancellationToken,
    ) -> TaskPoll {
        match self {
            Self::Instant => TaskPoll::Complete,
            Self::Move(task) => task.poll(pawn, ctx, token),
            Self::Timed(task) => task.poll(pawn, ctx, token),
        }
    }
}

/// Path result written by the finder's callback.
#[derive(Debug, Default)]
struct PathSlot {
    state: PathState,
    waypoints: Vec<Square>,
}

#[derive(Debug)]
enum MovePhase {
    Request,
    AwaitPath,
    Walk { waypoints: Vec<Square>, next: usize },
}

#[derive(Debug)]
pub(crate) struct MoveTask {
    target: Square,
    phase: MovePhase,
    slot: Rc<RefCell<PathSlot>>,
}

impl MoveTask {
    fn new(target: Square) -> Self {
        Self {
            target,
            phase: MovePhase::Request,
            slot: Rc::default(),
        }
    }

    fn poll(
        &mut self,
        pawn: &mut PawnController,
        ctx: &mut ActionContext<'_>,
        token: &CancellationToken,
    ) -> TaskPoll {
        if token.is_cancelled() {
            pawn.interrupt(ctx.entities);
            return TaskPoll::Cancelled;
        }

        loop {
            match self.phase {
                MovePhase::Request => {
                    if pawn.stands_on(self.target) {
                        ctx.emit(StageEvent::MoveFinished {
                            pawn: pawn.id(),
                            at: pawn.square(),
                        });
                        return TaskPoll::Complete;
                    }
                    self.request_path(pawn, ctx);
                    self.phase = MovePhase::AwaitPath;
                    return TaskPoll::Pending;
                }
                MovePhase::AwaitPath => {
                    let waypoints = {
                        let mut slot = self.slot.borrow_mut();
                        if slot.state != PathState::Done {
                            return TaskPoll::Pending;
                        }
                        std::mem::take(&mut slot.waypoints)
                    };
                    if waypoints.is_empty() {
                        tracing::debug!(pawn = pawn.id(), target = %self.target, "No path");
                        ctx.emit(StageEvent::PathFailed {
                            pawn: pawn.id(),
                            target: self.target,
                        });
                        return TaskPoll::Complete;
                    }
                    self.phase = MovePhase::Walk { waypoints, next: 0 };
                }
                MovePhase::Walk { .. } => return self.walk(pawn, ctx),
            }
        }
    }

    fn request_path(&self, pawn: &PawnController, ctx: &mut ActionContext<'_>) {
        let slot = Rc::clone(&self.slot);
        slot.borrow_mut().state = PathState::Finding;
        let metric = ctx.config.move_metric;
        let request = PathRequest::new(
            pawn.id(),
            pawn.square(),
            self.target,
            pawn.footprint(),
            move |waypoints| {
                let mut slot = slot.borrow_mut();
                slot.waypoints = waypoints;
                slot.state = PathState::Done;
            },
        )
        .with_walkable(stage_walkable)
        .with_distance(move |a, b| metric.distance(a, b));
        ctx.path_finder.request_for_path(request);
    }

    fn walk(&mut self, pawn: &mut PawnController, ctx: &mut ActionContext<'_>) -> TaskPoll {
        let MovePhase::Walk { waypoints, next } = &mut self.phase else {
            return TaskPoll::Complete;
        };

        if !pawn.is_moving() {
            while *next < waypoints.len() && pawn.stands_on(waypoints[*next]) {
                *next += 1;
            }
            let Some(&waypoint) = waypoints.get(*next) else {
                ctx.emit(StageEvent::MoveFinished {
                    pawn: pawn.id(),
                    at: pawn.square(),
                });
                return TaskPoll::Complete;
            };
            if !stage_walkable(&ctx.view(), pawn.id(), waypoint, pawn.footprint()) {
                tracing::debug!(pawn = pawn.id(), at = %waypoint, "Path blocked");
                pawn.interrupt(ctx.entities);
                ctx.emit(StageEvent::PathBlocked {
                    pawn: pawn.id(),
                    at: waypoint,
                });
                return TaskPoll::Complete;
            }
            pawn.begin_move(waypoint, ctx.entities);
        }

        if pawn.advance_move(ctx.dt, ctx.entities) {
            *next += 1;
            if *next >= waypoints.len() {
                ctx.emit(StageEvent::MoveFinished {
                    pawn: pawn.id(),
                    at: pawn.square(),
                });
                return TaskPoll::Complete;
            }
        }
        TaskPoll::Pending
    }
}

#[derive(Debug)]
pub(crate) struct TimedTask {
    kind: OperationKind,
    countdown: Countdown,
    started: bool,
}

impl TimedTask {
    fn new(kind: OperationKind, duration: Fixed) -> Self {
        Self {
            kind,
            countdown: Countdown::new(duration),
            started: false,
        }
    }

    fn poll(
        &mut self,
        pawn: &mut PawnController,
        ctx: &mut ActionContext<'_>,
        token: &CancellationToken,
    ) -> TaskPoll {
        if token.is_cancelled() {
            if self.started {
                pawn.end_action();
            }
            return TaskPoll::Cancelled;
        }

        if !self.started {
            if !is_applicable(self.kind, pawn, ctx) {
                tracing::debug!(pawn = pawn.id(), operation = %self.kind, "Operation skipped");
                return TaskPoll::Complete;
            }
            self.started = true;
            pawn.begin_action();
        }

        if !self.countdown.tick(ctx.dt) {
            return TaskPoll::Pending;
        }

        pawn.end_action();
        if is_applicable(self.kind, pawn, ctx) {
            apply(self.kind, pawn, ctx);
        } else {
            tracing::debug!(pawn = pawn.id(), operation = %self.kind, "Operation target gone");
        }
        TaskPoll::Complete
    }
}

/// Chebyshev distance between the nearest cells of two areas.
fn reach_to(pawn: &PawnController, anchor: Square, footprint: Footprint) -> i32 {
    pawn.footprint()
        .cells(pawn.square())
        .flat_map(|from| footprint.cells(anchor).map(move |cell| Square::distance(from, cell)))
        .min()
        .unwrap_or(i32::MAX)
}

fn is_applicable(kind: OperationKind, pawn: &PawnController, ctx: &ActionContext<'_>) -> bool {
    let reach = ctx.config.reach;
    match kind {
        OperationKind::Collect { object } => ctx.objects.get(&object).is_some_and(|o| {
            o.carried_by().is_none() && reach_to(pawn, o.square(), o.footprint()) <= reach
        }),
        OperationKind::CarryOn { object } => {
            pawn.carrying().is_none()
                && ctx.objects.get(&object).is_some_and(|o| {
                    o.carried_by().is_none() && reach_to(pawn, o.square(), o.footprint()) <= reach
                })
        }
        OperationKind::PutDown { at } => pawn
            .carrying()
            .and_then(|id| ctx.objects.get(&id))
            .is_some_and(|o| {
                let cell = at.unwrap_or(pawn.square());
                ctx.stage.check_area_intact(cell, o.footprint())
                    && o
                        .footprint()
                        .cells(cell)
                        .all(|c| !ctx.entities.facilities.is_occupied(c))
                    && reach_to(pawn, cell, o.footprint()) <= reach
            }),
        OperationKind::Produce { facility } => ctx
            .facilities
            .get(&facility)
            .is_some_and(|f| reach_to(pawn, f.square(), f.footprint()) <= reach),
        OperationKind::Attack { target } => {
            target != pawn.id()
                && ctx
                    .entities
                    .pawns
                    .placement(target)
                    .is_some_and(|p| reach_to(pawn, p.anchor, p.footprint) <= reach)
        }
        OperationKind::Think | OperationKind::Happy | OperationKind::Freeze => true,
        OperationKind::Thunder { at } | OperationKind::Meteor { at } => {
            ctx.stage.check_tile_exist(at)
        }
        OperationKind::MoveTo { .. } => false,
    }
}

fn apply(kind: OperationKind, pawn: &mut PawnController, ctx: &mut ActionContext<'_>) {
    let id = pawn.id();
    match kind {
        OperationKind::Collect { object } => {
            if let Some(o) = ctx.objects.get_mut(&object) {
                o.record_collection();
                ctx.emit(StageEvent::Collected { pawn: id, object });
            }
        }
        OperationKind::CarryOn { object } => {
            if let Some(o) = ctx.objects.get_mut(&object) {
                o.pick_up(id, ctx.entities);
                pawn.set_carrying(Some(object));
                ctx.emit(StageEvent::CarriedOn { pawn: id, object });
            }
        }
        OperationKind::PutDown { at } => {
            let cell = at.unwrap_or(pawn.square());
            if let Some(object) = pawn.carrying() {
                if let Some(o) = ctx.objects.get_mut(&object) {
                    o.drop_at(cell, ctx.entities);
                    pawn.set_carrying(None);
                    ctx.emit(StageEvent::PutDown {
                        pawn: id,
                        object,
                        at: cell,
                    });
                }
            }
        }
        OperationKind::Produce { facility } => {
            if let Some(f) = ctx.facilities.get_mut(&facility) {
                f.record_production();
                ctx.emit(StageEvent::Produced { pawn: id, facility });
            }
        }
        OperationKind::Attack { target } => {
            let damage = ctx.config.attack_damage;
            ctx.emit(StageEvent::Attacked {
                attacker: id,
                target,
                damage,
            });
        }
        OperationKind::Think => ctx.emit(StageEvent::Emote {
            pawn: id,
            kind: EmoteKind::Think,
        }),
        OperationKind::Happy => ctx.emit(StageEvent::Emote {
            pawn: id,
            kind: EmoteKind::Happy,
        }),
        OperationKind::Freeze => ctx.emit(StageEvent::Emote {
            pawn: id,
            kind: EmoteKind::Freeze,
        }),
        OperationKind::Thunder { at } => strike(id, StrikeKind::Thunder, at, ctx),
        OperationKind::Meteor { at } => strike(id, StrikeKind::Meteor, at, ctx),
        OperationKind::MoveTo { .. } => {}
    }
}

fn strike(caster: EntityId, kind: StrikeKind, at: Square, ctx: &mut ActionContext<'_>) {
    let radius = kind.radius();
    let mut victims = Vec::new();
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            let cell = Square::new(at.x + dx, at.y + dy);
            victims.extend(
                ctx.entities
                    .pawns
                    .occupants(cell)
                    .iter()
                    .copied()
                    .filter(|&id| id != caster),
            );
        }
    }
    victims.sort_unstable();
    victims.dedup();

    let damage = match kind {
        StrikeKind::Thunder => ctx.config.thunder_damage,
        StrikeKind::Meteor => ctx.config.meteor_damage,
    };
    tracing::debug!(caster, ?kind, at = %at, victims = victims.len(), "Strike");
    ctx.emit(StageEvent::Strike {
        pawn: caster,
        kind,
        at,
        victims,
        damage,
    });
}
