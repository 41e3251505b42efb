//! Minimal generic state machine driver.
//!
//! Holds the single active state of a robot or controller and records
//! transitions. Enter/exit behaviour lives with the owner: it matches on the
//! `(from, to)` pair returned by [`StateMachine::transition`].

use serde::{Deserialize, Serialize};

/// Single-active-state machine over a `Copy` state enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateMachine<S> {
    current: S,
    previous: Option<S>,
    ticks_in_state: u64,
}

impl<S: Copy + Eq> StateMachine<S> {
    /// Start in `initial`.
    #[must_use]
    pub fn new(initial: S) -> Self {
        Self {
            current: initial,
            previous: None,
            ticks_in_state: 0,
        }
    }

    /// Active state.
    #[must_use]
    pub fn current(&self) -> S {
        self.current
    }

    /// State before the last transition.
    #[must_use]
    pub fn previous(&self) -> Option<S> {
        self.previous
    }

    /// Ticks spent in the active state.
    #[must_use]
    pub fn ticks_in_state(&self) -> u64 {
        self.ticks_in_state
    }

    /// True if `state` is active.
    #[must_use]
    pub fn is(&self, state: S) -> bool {
        self.current == state
    }

    /// Count one tick in the active state.
    pub fn tick(&mut self) {
        self.ticks_in_state = self.ticks_in_state.saturating_add(1);
    }

    /// Switch to `next`. Returns `(from, to)` when the state changed, `None`
    /// for a self-transition.
    pub fn transition(&mut self, next: S) -> Option<(S, S)> {
        if self.current == next {
            return None;
        }
        let from = self.current;
        self.previous = Some(from);
        self.current = next;
        self.ticks_in_state = 0;
        Some((from, next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Light {
        Red,
        Green,
    }

    #[test]
    fn test_transition_records_previous_and_resets_ticks() {
        let mut machine = StateMachine::new(Light::Red);
        machine.tick();
        machine.tick();
        assert_eq!(machine.ticks_in_state(), 2);

        assert_eq!(machine.transition(Light::Green), Some((Light::Red, Light::Green)));
        assert_eq!(machine.previous(), Some(Light::Red));
        assert_eq!(machine.ticks_in_state(), 0);
        assert!(machine.is(Light::Green));
    }

    #[test]
    fn test_self_transition_is_ignored() {
        let mut machine = StateMachine::new(Light::Red);
        machine.tick();
        assert_eq!(machine.transition(Light::Red), None);
        assert_eq!(machine.ticks_in_state(), 1);
        assert_eq!(machine.previous(), None);
    }
}
