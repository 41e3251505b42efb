//! Queued units of pawn behaviour.
//!
//! A [`PawnOperation`] is produced by a robot's decision step (or by
//! external direction logic) and consumed by the executing state. Every kind
//! carries its own typed payload.

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::entity_index::EntityId;
use crate::square::Square;

/// What an operation does, with its arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    /// Walk to a cell. `None` completes immediately.
    MoveTo {
        /// Destination anchor.
        target: Option<Square>,
    },
    /// Gather from an object.
    Collect {
        /// Object gathered from.
        object: EntityId,
    },
    /// Pick an object up and carry it.
    CarryOn {
        /// Object picked up.
        object: EntityId,
    },
    /// Drop the carried object. `None` drops it where the pawn stands.
    PutDown {
        /// Drop position.
        at: Option<Square>,
    },
    /// Work a facility.
    Produce {
        /// Facility worked.
        facility: EntityId,
    },
    /// Hit another pawn.
    Attack {
        /// Pawn attacked.
        target: EntityId,
    },
    /// Emote: thinking.
    Think,
    /// Emote: happy.
    Happy,
    /// Stand frozen.
    Freeze,
    /// Call a thunder strike on a cell.
    Thunder {
        /// Struck cell.
        at: Square,
    },
    /// Call a meteor on a cell.
    Meteor {
        /// Impact cell.
        at: Square,
    },
}

impl OperationKind {
    /// Short tag for logs and reports.
    #[must_use]
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::MoveTo { .. } => "MoveTo",
            Self::Collect { .. } => "Collect",
            Self::CarryOn { .. } => "CarryOn",
            Self::PutDown { .. } => "PutDown",
            Self::Produce { .. } => "Produce",
            Self::Attack { .. } => "Attack",
            Self::Think => "Think",
            Self::Happy => "Happy",
            Self::Freeze => "Freeze",
            Self::Thunder { .. } => "Thunder",
            Self::Meteor { .. } => "Meteor",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// A queued unit of work for one pawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PawnOperation {
    /// Pawn that runs the operation.
    pub pawn: EntityId,
    /// What to do.
    pub kind: OperationKind,
    /// Priority operations preempt running non-priority ones.
    pub priority: bool,
}

impl PawnOperation {
    /// Non-priority operation.
    #[must_use]
    pub const fn new(pawn: EntityId, kind: OperationKind) -> Self {
        Self {
            pawn,
            kind,
            priority: false,
        }
    }

    /// Priority operation.
    #[must_use]
    pub const fn priority(pawn: EntityId, kind: OperationKind) -> Self {
        Self {
            pawn,
            kind,
            priority: true,
        }
    }

    /// Walk to `target`.
    #[must_use]
    pub const fn move_to(pawn: EntityId, target: Square) -> Self {
        Self::new(
            pawn,
            OperationKind::MoveTo {
                target: Some(target),
            },
        )
    }
}

/// FIFO of pending operations with priority insertion.
///
/// Priority operations queue behind earlier priority operations but ahead
/// of every non-priority one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationQueue {
    operations: VecDeque<PawnOperation>,
}

impl OperationQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an operation.
    pub fn push(&mut self, operation: PawnOperation) {
        if operation.priority {
            let position = self
                .operations
                .iter()
                .position(|queued| !queued.priority)
                .unwrap_or(self.operations.len());
            self.operations.insert(position, operation);
        } else {
            self.operations.push_back(operation);
        }
    }

    /// Next operation to run.
    #[must_use]
    pub fn peek(&self) -> Option<&PawnOperation> {
        self.operations.front()
    }

    /// Take the next operation.
    pub fn pop(&mut self) -> Option<PawnOperation> {
        self.operations.pop_front()
    }

    /// Drop every pending operation.
    pub fn clear(&mut self) {
        self.operations.clear();
    }

    /// Check if the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Number of pending operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Pending operations in run order.
    pub fn iter(&self) -> impl Iterator<Item = &PawnOperation> {
        self.operations.iter()
    }
}
