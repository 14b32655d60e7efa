//! Wait for the host to display a specific dashboard.

use crate::deadline::Deadline;
use crate::error::ReadyError;
use crate::host::DashboardHost;
use crate::model::{ActiveDashboard, CycleToken, millis};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Why the waiter stopped without a match.
#[derive(Debug)]
pub enum WaitAbort {
    /// The deadline elapsed.
    Timeout(ReadyError),
    /// The cycle was cancelled.
    Cancelled,
}

/// Poll `host` until its active dashboard is exactly `identifier`.
///
/// An absent or different dashboard means "not yet". The last sleep is
/// clamped to the remaining budget, so overshoot past the deadline is at
/// most the time one poll takes.
pub async fn wait_for_dashboard<H: DashboardHost + ?Sized>(
    host: &H,
    cycle: CycleToken,
    identifier: &str,
    deadline: Deadline,
    poll_interval: Duration,
    cancel: &CancellationToken,
) -> std::result::Result<ActiveDashboard, WaitAbort> {
    let mut polls: u32 = 0;
    loop {
        polls += 1;
        match host.active_dashboard() {
            Some(snapshot) if snapshot.uid == identifier => {
                debug!(
                    %cycle,
                    identifier,
                    polls,
                    elapsed_ms = millis(deadline.elapsed()),
                    "dashboard active"
                );
                return Ok(ActiveDashboard::acquire(cycle, snapshot));
            }
            Some(snapshot) => {
                trace!(%cycle, expected = identifier, active = %snapshot.uid, "other dashboard active");
            }
            None => trace!(%cycle, expected = identifier, "no active dashboard"),
        }

        if deadline.is_expired() {
            return Err(WaitAbort::Timeout(ReadyError::DashboardTimeout {
                identifier: identifier.to_owned(),
                elapsed_ms: millis(deadline.elapsed()),
            }));
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(WaitAbort::Cancelled),
            _ = tokio::time::sleep(poll_interval.min(deadline.remaining())) => {}
        }
    }
}
