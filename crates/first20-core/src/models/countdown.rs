//! Countdown state machine for a single timer
//!
//! Pure and synchronous: the runtime owns the tick schedule and decides when
//! to persist, this type only enforces the transitions and the
//! `0..=TWENTY_HOURS` range of `time_left`.

use serde::{Deserialize, Serialize};

use super::timer::{TimeBreakdown, TWENTY_HOURS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CountdownState {
    Idle,
    Running,
}

/// Result of a single tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Ignored because the countdown is idle
    Skipped,
    /// Decremented and still running
    Ticked(u32),
    /// Reached zero and forced back to idle
    Expired,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Countdown {
    time_left: u32,
    state: CountdownState,
}

impl Countdown {
    /// Idle countdown starting at `time_left`, clamped to the 20 hour budget
    pub fn new(time_left: u32) -> Self {
        Self {
            time_left: time_left.min(TWENTY_HOURS),
            state: CountdownState::Idle,
        }
    }

    /// Returns `false` when already running or nothing is left to count
    pub fn start(&mut self) -> bool {
        if self.state == CountdownState::Running || self.time_left == 0 {
            return false;
        }
        self.state = CountdownState::Running;
        true
    }

    /// Returns `false` when already idle
    pub fn pause(&mut self) -> bool {
        if self.state == CountdownState::Idle {
            return false;
        }
        self.state = CountdownState::Idle;
        true
    }

    pub fn tick(&mut self) -> TickOutcome {
        if self.state == CountdownState::Idle {
            return TickOutcome::Skipped;
        }

        self.time_left = self.time_left.saturating_sub(1);
        if self.time_left == 0 {
            self.state = CountdownState::Idle;
            TickOutcome::Expired
        } else {
            TickOutcome::Ticked(self.time_left)
        }
    }

    /// Back to the full budget, idle, from any state
    pub fn reset(&mut self) {
        self.state = CountdownState::Idle;
        self.time_left = TWENTY_HOURS;
    }

    /// Overwrite the remaining time while idle. Ignored while running.
    pub fn set_time_left(&mut self, time_left: u32) -> bool {
        if self.state == CountdownState::Running {
            return false;
        }
        self.time_left = time_left.min(TWENTY_HOURS);
        true
    }

    pub fn time_left(&self) -> u32 {
        self.time_left
    }

    pub fn state(&self) -> CountdownState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == CountdownState::Running
    }

    pub fn breakdown(&self) -> TimeBreakdown {
        TimeBreakdown::from_seconds(self.time_left)
    }
}
