//! Notifications emitted for external collaborators.
//!
//! Rendering, audio and direction logic live outside the core. They learn
//! what happened by draining [`StageEvent`]s from the simulation after each
//! tick.

use serde::{Deserialize, Serialize};

use crate::entity_index::EntityId;
use crate::operation::OperationKind;
use crate::square::Square;

/// How an operation left the running slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationOutcome {
    /// Ran to the end (including no-op completions).
    Completed,
    /// Observed its cancellation token.
    Cancelled,
    /// Replaced by a priority operation.
    Preempted,
}

/// Emote played by a pawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EmoteKind {
    /// Thought bubble.
    Think,
    /// Happy jump.
    Happy,
    /// Frozen in place.
    Freeze,
}

/// Area strike called by a pawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StrikeKind {
    /// Hits the target cell only.
    Thunder,
    /// Hits the target cell and its eight neighbours.
    Meteor,
}

impl StrikeKind {
    /// Chebyshev radius around the target cell.
    #[must_use]
    pub const fn radius(self) -> i32 {
        match self {
            Self::Thunder => 0,
            Self::Meteor => 1,
        }
    }
}

/// Something observable happened on the stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageEvent {
    /// A pawn started running an operation.
    OperationStarted {
        /// Pawn.
        pawn: EntityId,
        /// Operation kind.
        kind: OperationKind,
    },
    /// A pawn's running operation ended.
    OperationFinished {
        /// Pawn.
        pawn: EntityId,
        /// Operation kind.
        kind: OperationKind,
        /// How it ended.
        outcome: OperationOutcome,
    },
    /// A move reached its destination.
    MoveFinished {
        /// Pawn.
        pawn: EntityId,
        /// Final anchor.
        at: Square,
    },
    /// No path to the move target.
    PathFailed {
        /// Pawn.
        pawn: EntityId,
        /// Requested target.
        target: Square,
    },
    /// A waypoint became occupied while walking.
    PathBlocked {
        /// Pawn.
        pawn: EntityId,
        /// Blocked waypoint.
        at: Square,
    },
    /// A pawn gathered from an object.
    Collected {
        /// Pawn.
        pawn: EntityId,
        /// Object.
        object: EntityId,
    },
    /// A pawn picked an object up.
    CarriedOn {
        /// Pawn.
        pawn: EntityId,
        /// Object.
        object: EntityId,
    },
    /// A pawn dropped its carried object.
    PutDown {
        /// Pawn.
        pawn: EntityId,
        /// Object.
        object: EntityId,
        /// Drop anchor.
        at: Square,
    },
    /// A pawn worked a facility.
    Produced {
        /// Pawn.
        pawn: EntityId,
        /// Facility.
        facility: EntityId,
    },
    /// A pawn hit another pawn.
    Attacked {
        /// Attacker.
        attacker: EntityId,
        /// Target.
        target: EntityId,
        /// Damage dealt.
        damage: u32,
    },
    /// A pawn played an emote.
    Emote {
        /// Pawn.
        pawn: EntityId,
        /// Emote.
        kind: EmoteKind,
    },
    /// A pawn called a strike.
    Strike {
        /// Caster.
        pawn: EntityId,
        /// Strike kind.
        kind: StrikeKind,
        /// Target cell.
        at: Square,
        /// Pawns hit, ascending id.
        victims: Vec<EntityId>,
        /// Damage dealt to each victim.
        damage: u32,
    },
    /// A pawn's health reached zero.
    PawnDied {
        /// Pawn.
        pawn: EntityId,
    },
}

impl StageEvent {
    /// Short tag for counting and logs.
    #[must_use]
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::OperationStarted { .. } => "OperationStarted",
            Self::OperationFinished { .. } => "OperationFinished",
            Self::MoveFinished { .. } => "MoveFinished",
            Self::PathFailed { .. } => "PathFailed",
            Self::PathBlocked { .. } => "PathBlocked",
            Self::Collected { .. } => "Collected",
            Self::CarriedOn { .. } => "CarriedOn",
            Self::PutDown { .. } => "PutDown",
            Self::Produced { .. } => "Produced",
            Self::Attacked { .. } => "Attacked",
            Self::Emote { .. } => "Emote",
            Self::Strike { .. } => "Strike",
            Self::PawnDied { .. } => "PawnDied",
        }
    }
}
