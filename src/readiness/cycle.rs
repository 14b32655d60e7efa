//! Per-cycle context and the cycle state machine.

use crate::deadline::Deadline;
use crate::model::CycleToken;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Cycle states: `Idle → AwaitingDashboard → AwaitingPanels → terminal`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    #[default]
    Idle,
    AwaitingDashboard,
    AwaitingPanels,
    Ready,
    Failed,
    TimedOut,
    Cancelled,
}

impl CycleState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Ready | Self::Failed | Self::TimedOut | Self::Cancelled
        )
    }

    #[must_use]
    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::AwaitingDashboard | Self::AwaitingPanels)
    }

    /// Whether `next` is a legal successor of `self`.
    #[must_use]
    pub fn can_advance_to(self, next: CycleState) -> bool {
        use CycleState::*;
        match (self, next) {
            (Idle, AwaitingDashboard) => true,
            (s, AwaitingDashboard) if s.is_terminal() => true,
            (AwaitingDashboard, AwaitingPanels) => true,
            (AwaitingDashboard, TimedOut | Cancelled) => true,
            (AwaitingPanels, n) if n.is_terminal() => true,
            _ => false,
        }
    }
}

/// Signal bookkeeping for one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleCounters {
    /// Signals that changed the tally.
    pub applied: u64,
    /// Repeat signals from a panel that already reported.
    pub duplicates_ignored: u64,
    /// Signals for panels outside the expected set.
    pub foreign_ignored: u64,
    /// Signals still tagged with an earlier cycle's token.
    pub stale_ignored: u64,
}

/// Everything a cycle owns, created fresh by the gate for each cycle.
#[derive(Debug)]
pub struct CycleContext {
    token: CycleToken,
    deadline: Deadline,
    cancel: CancellationToken,
    pub(crate) counters: CycleCounters,
}

impl CycleContext {
    #[must_use]
    pub fn new(token: CycleToken, budget: Duration, cancel: CancellationToken) -> Self {
        Self {
            token,
            deadline: Deadline::after(budget),
            cancel,
            counters: CycleCounters::default(),
        }
    }

    #[must_use]
    pub fn token(&self) -> CycleToken {
        self.token
    }

    #[must_use]
    pub fn deadline(&self) -> Deadline {
        self.deadline
    }

    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    #[must_use]
    pub fn counters(&self) -> CycleCounters {
        self.counters
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.deadline.elapsed()
    }
}
