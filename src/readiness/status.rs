//! Observable cycle status, cancellation and per-cycle reports.

use crate::model::CycleToken;
use crate::readiness::cycle::{CycleCounters, CycleState};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Point-in-time view of the gate, published on every state change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleStatus {
    pub cycle: Option<CycleToken>,
    pub state: CycleState,
    pub identifier: Option<String>,
    /// Outcome label of the last settled cycle.
    pub outcome: Option<String>,
    pub expected_panels: usize,
    /// Stale signals discarded over the gate's lifetime.
    pub stale_signals_ignored: u64,
}

/// Read side of the gate's status channel. Cheap to clone.
#[derive(Debug, Clone)]
pub struct StatusHandle {
    rx: watch::Receiver<CycleStatus>,
}

impl StatusHandle {
    pub(crate) fn new(rx: watch::Receiver<CycleStatus>) -> Self {
        Self { rx }
    }

    #[must_use]
    pub fn snapshot(&self) -> CycleStatus {
        self.rx.borrow().clone()
    }

    /// True once the latest cycle settled `Ready`. Goes false again as soon
    /// as the next cycle starts.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.rx.borrow().state == CycleState::Ready
    }

    /// Wait until the current cycle reaches a terminal state.
    ///
    /// Returns `None` if the gate was dropped first.
    pub async fn settled(&mut self) -> Option<CycleStatus> {
        self.rx
            .wait_for(|status| status.state.is_terminal())
            .await
            .ok()
            .map(|status| status.clone())
    }
}

/// Cancels whichever cycle is in flight on the owning gate.
#[derive(Debug, Clone, Default)]
pub struct CycleCanceller {
    slot: Arc<Mutex<Option<CancellationToken>>>,
}

impl CycleCanceller {
    /// Cancel the in-flight cycle. Returns `false` when the gate is idle.
    pub fn cancel(&self) -> bool {
        let slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        match slot.as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub(crate) fn arm(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(token.clone());
        token
    }

    pub(crate) fn disarm(&self) {
        self.slot.lock().unwrap_or_else(|e| e.into_inner()).take();
    }
}

/// Summary of one settled cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle: CycleToken,
    pub identifier: String,
    pub outcome: String,
    pub elapsed_ms: u64,
    pub resolved_panels: usize,
    pub skipped_panels: usize,
    pub counters: CycleCounters,
}

/// Counters accumulated over a gate's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateStats {
    pub cycles: u64,
    pub ready: u64,
    pub panel_failed: u64,
    pub timed_out: u64,
    pub cancelled: u64,
    pub stale_signals_ignored: u64,
}
