//! Named, cancellable timers.
//!
//! The session never sleeps. It arms a timer by id and gets back a token; the
//! runtime delivers the token when the delay elapses. Re-arming or cancelling
//! an id invalidates every token issued for it before, so a late delivery of
//! a superseded timer is recognized and ignored.

use std::collections::HashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TimerId {
    Reconnect,
    OnboardingPacing,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimerToken {
    pub id: TimerId,
    generation: u64,
}

#[derive(Debug, Default)]
pub struct TimerTable {
    next_generation: u64,
    armed: HashMap<TimerId, u64>,
}

impl TimerTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm `id`, superseding any earlier arming.
    pub fn arm(&mut self, id: TimerId) -> TimerToken {
        self.next_generation += 1;
        self.armed.insert(id, self.next_generation);
        TimerToken { id, generation: self.next_generation }
    }

    /// Returns whether the timer was armed.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        self.armed.remove(&id).is_some()
    }

    /// Consume a fired token. Returns `false` for stale tokens.
    pub fn fire(&mut self, token: TimerToken) -> bool {
        if self.armed.get(&token.id) == Some(&token.generation) {
            self.armed.remove(&token.id);
            true
        } else {
            false
        }
    }

    #[must_use]
    pub fn is_armed(&self, id: TimerId) -> bool {
        self.armed.contains_key(&id)
    }
}

#[cfg(test)]
#[path = "timers_test.rs"]
mod tests;
