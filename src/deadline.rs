//! Deadline clock for readiness cycles.
//!
//! Built on `tokio::time::Instant`, so tests drive it with paused virtual
//! time (`#[tokio::test(start_paused = true)]`) instead of real timers.

use std::time::Duration;
use tokio::time::Instant;

/// A fixed budget measured from the moment it was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    started: Instant,
    budget: Duration,
}

impl Deadline {
    /// Start a deadline now.
    #[must_use]
    pub fn after(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget,
        }
    }

    /// A deadline sharing this one's start but with a smaller budget.
    #[must_use]
    pub fn capped(&self, budget: Duration) -> Self {
        Self {
            started: self.started,
            budget: self.budget.min(budget),
        }
    }

    #[must_use]
    pub fn budget(&self) -> Duration {
        self.budget
    }

    #[must_use]
    pub fn expires_at(&self) -> Instant {
        self.started + self.budget
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.elapsed())
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }
}
