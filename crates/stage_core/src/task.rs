//! Cooperative task primitives.
//!
//! Operations run as tick-polled tasks on the simulation thread. A task only
//! suspends where it returns [`TaskPoll::Pending`]; cancellation is a shared
//! flag the task checks at those points.

use std::cell::Cell;
use std::rc::Rc;

use crate::math::Fixed;

/// Outcome of polling a task for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPoll {
    /// Still running; poll again next tick.
    Pending,
    /// Finished normally.
    Complete,
    /// Stopped after observing its cancellation token.
    Cancelled,
}

impl TaskPoll {
    /// True for `Complete` and `Cancelled`.
    #[must_use]
    pub const fn is_finished(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Cooperative cancellation signal shared between a task and its owner.
///
/// Clones observe the same flag. Cancelling is idempotent and cannot be
/// undone.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Rc<Cell<bool>>,
}

impl CancellationToken {
    /// Create a fresh, un-cancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.set(true);
    }

    /// True once [`cancel`](Self::cancel) has been called on any clone.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.get()
    }
}

/// Accumulates elapsed time across ticks until a duration has passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Countdown {
    duration: Fixed,
    elapsed: Fixed,
}

impl Countdown {
    /// Start a countdown of `duration` seconds.
    #[must_use]
    pub fn new(duration: Fixed) -> Self {
        Self {
            duration: duration.max(Fixed::ZERO),
            elapsed: Fixed::ZERO,
        }
    }

    /// Advance by `dt`; returns true once the duration has elapsed.
    pub fn tick(&mut self, dt: Fixed) -> bool {
        self.elapsed = self.elapsed.saturating_add(dt);
        self.is_done()
    }

    /// True once the duration has elapsed.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.elapsed >= self.duration
    }

    /// Fraction of the duration elapsed, clamped to `[0, 1]`.
    #[must_use]
    pub fn progress(&self) -> Fixed {
        if self.duration == Fixed::ZERO {
            return Fixed::ONE;
        }
        (self.elapsed / self.duration).min(Fixed::ONE)
    }

    /// Reset elapsed time to zero.
    pub fn reset(&mut self) {
        self.elapsed = Fixed::ZERO;
    }
}
