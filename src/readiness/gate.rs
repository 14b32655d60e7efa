//! The public entry point: one readiness cycle per call.

use crate::config::ReadyConfig;
use crate::error::{ReadyError, Result, format_panel_ids};
use crate::host::DashboardHost;
use crate::host::signals::SignalHub;
use crate::model::{
    CycleToken, DashboardRequest, PanelFilterConfig, ReadinessOutcome, TimeRange, TimeoutStage,
    millis,
};
use crate::readiness::aggregator::{ReadinessAggregator, SignalInbox};
use crate::readiness::cycle::{CycleContext, CycleState};
use crate::readiness::navigation;
use crate::readiness::resolver::resolve_panels;
use crate::readiness::status::{
    CycleCanceller, CycleReport, CycleStatus, GateStats, StatusHandle,
};
use crate::readiness::waiter::{WaitAbort, wait_for_dashboard};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

/// Drives readiness cycles against one host.
///
/// Cycles run strictly one at a time: every cycle method takes `&mut self`.
pub struct ReadinessGate<H: DashboardHost> {
    host: H,
    hub: SignalHub,
    inbox: SignalInbox,
    config: ReadyConfig,
    last_token: CycleToken,
    status_tx: Arc<watch::Sender<CycleStatus>>,
    canceller: CycleCanceller,
    last_identifier: Option<String>,
    last_filter: Option<PanelFilterConfig>,
    last_report: Option<CycleReport>,
    stats: GateStats,
}

impl<H: DashboardHost> ReadinessGate<H> {
    #[must_use]
    pub fn new(host: H, hub: SignalHub, config: ReadyConfig) -> Self {
        let (status_tx, _) = watch::channel(CycleStatus::default());
        Self {
            host,
            hub,
            inbox: SignalInbox::new(),
            config,
            last_token: CycleToken(0),
            status_tx: Arc::new(status_tx),
            canceller: CycleCanceller::default(),
            last_identifier: None,
            last_filter: None,
            last_report: None,
            stats: GateStats::default(),
        }
    }

    #[must_use]
    pub fn host(&self) -> &H {
        &self.host
    }

    #[must_use]
    pub fn hub(&self) -> &SignalHub {
        &self.hub
    }

    #[must_use]
    pub fn config(&self) -> &ReadyConfig {
        &self.config
    }

    #[must_use]
    pub fn status_handle(&self) -> StatusHandle {
        StatusHandle::new(self.status_tx.subscribe())
    }

    #[must_use]
    pub fn canceller(&self) -> CycleCanceller {
        self.canceller.clone()
    }

    #[must_use]
    pub fn last_report(&self) -> Option<&CycleReport> {
        self.last_report.as_ref()
    }

    #[must_use]
    pub fn stats(&self) -> GateStats {
        self.stats
    }

    /// Identifier of the most recently opened dashboard.
    #[must_use]
    pub fn last_identifier(&self) -> Option<&str> {
        self.last_identifier.as_deref()
    }

    /// Filter used by the most recent open.
    #[must_use]
    pub fn last_filter(&self) -> Option<&PanelFilterConfig> {
        self.last_filter.as_ref()
    }

    /// Navigate to `request` and wait until every expected panel has data.
    ///
    /// A focused panel on the request overrides the one in `filter`; the
    /// route and the expected panel set both use the result. The dashboard
    /// wait gets `min(dashboard_deadline, total_deadline)`; the panel wait
    /// gets whatever remains of `total_deadline`.
    pub async fn open_and_await_ready(
        &mut self,
        request: &DashboardRequest,
        filter: &PanelFilterConfig,
        total_deadline: Duration,
    ) -> ReadinessOutcome {
        let filter = focus_from_request(filter.clone(), request);
        let (ctx, guard) = self.begin(&request.identifier, total_deadline);
        navigation::request(
            &self.host,
            request,
            filter.focused_panel_id.as_ref(),
            &self.config.view,
        );
        self.last_identifier = Some(request.identifier.clone());
        self.last_filter = Some(filter.clone());
        self.drive(ctx, guard, &request.identifier, &filter).await
    }

    /// [`open_and_await_ready`](Self::open_and_await_ready) with the
    /// configured filter and deadline.
    pub async fn open(&mut self, request: &DashboardRequest) -> ReadinessOutcome {
        let filter = self.filter_for(request);
        let deadline = self.config.timing.total_deadline();
        self.open_and_await_ready(request, &filter, deadline).await
    }

    /// Configured panel filter, with the request's focused panel taking
    /// precedence over `panel-id`.
    #[must_use]
    pub fn filter_for(&self, request: &DashboardRequest) -> PanelFilterConfig {
        focus_from_request(self.config.panel_filter(), request)
    }

    /// Change the time range of the open dashboard and wait for all panels
    /// to reload.
    ///
    /// # Errors
    ///
    /// Fails without starting a cycle when no dashboard has been opened or
    /// the host rejects the time range.
    pub async fn advance_time(
        &mut self,
        range: &TimeRange,
        filter: &PanelFilterConfig,
        total_deadline: Duration,
    ) -> Result<ReadinessOutcome> {
        let Some(identifier) = self.last_identifier.clone() else {
            return Err(ReadyError::Config(
                "advance_time called before any dashboard was opened".to_owned(),
            ));
        };
        self.host.set_time_range(range)?;
        let (ctx, guard) = self.begin(&identifier, total_deadline);
        Ok(self.drive(ctx, guard, &identifier, filter).await)
    }

    fn begin(&mut self, identifier: &str, total_deadline: Duration) -> (CycleContext, InFlight) {
        self.last_token = self.last_token.next();
        let token = self.last_token;
        let cancel = self.canceller.arm();
        let mut ctx = CycleContext::new(token, total_deadline, cancel);

        ctx.counters.stale_ignored += self.inbox.discard_stale(token);
        self.hub.hold(token);
        self.stats.cycles += 1;

        transition(&self.status_tx, token, CycleState::AwaitingDashboard, |status| {
            status.identifier = Some(identifier.to_owned());
            status.outcome = None;
            status.expected_panels = 0;
        });

        let guard = InFlight {
            cycle: token,
            canceller: self.canceller.clone(),
            hub: self.hub.clone(),
            status_tx: Arc::clone(&self.status_tx),
            armed: true,
        };
        (ctx, guard)
    }

    async fn drive(
        &mut self,
        mut ctx: CycleContext,
        guard: InFlight,
        identifier: &str,
        filter: &PanelFilterConfig,
    ) -> ReadinessOutcome {
        let dashboard_deadline = ctx
            .deadline()
            .capped(self.config.timing.dashboard_deadline());
        let poll_interval = self.config.timing.poll_interval();
        let cancel = ctx.cancel_token().clone();

        let waited = wait_for_dashboard(
            &self.host,
            ctx.token(),
            identifier,
            dashboard_deadline,
            poll_interval,
            &cancel,
        )
        .await;

        let (outcome, resolved, skipped) = match waited {
            Err(WaitAbort::Timeout(_)) => (
                ReadinessOutcome::TimedOut {
                    elapsed: ctx.elapsed(),
                    stage: TimeoutStage::Dashboard {
                        identifier: identifier.to_owned(),
                    },
                },
                0,
                0,
            ),
            Err(WaitAbort::Cancelled) => (
                ReadinessOutcome::Cancelled {
                    elapsed: ctx.elapsed(),
                },
                0,
                0,
            ),
            Ok(dashboard) => {
                let panels = resolve_panels(&dashboard, filter);
                transition(&self.status_tx, ctx.token(), CycleState::AwaitingPanels, |status| {
                    status.expected_panels = panels.len();
                });
                let outcome = ReadinessAggregator::new(&self.hub, &mut self.inbox)
                    .await_all(&mut ctx, dashboard, &panels)
                    .await;
                (outcome, panels.len(), panels.skipped().len())
            }
        };

        guard.settled();
        self.settle(&ctx, identifier, &outcome, resolved, skipped);
        outcome
    }

    fn settle(
        &mut self,
        ctx: &CycleContext,
        identifier: &str,
        outcome: &ReadinessOutcome,
        resolved: usize,
        skipped: usize,
    ) {
        self.canceller.disarm();

        let cycle = ctx.token();
        self.hub.release(cycle);
        let elapsed_ms = millis(ctx.elapsed());
        let counters = ctx.counters();
        self.stats.stale_signals_ignored += counters.stale_ignored;

        let state = match outcome {
            ReadinessOutcome::Ready(dashboard) => {
                self.stats.ready += 1;
                info!(
                    identifier,
                    %cycle,
                    elapsed_ms,
                    panels = resolved,
                    title = %dashboard.display_title(self.config.view.has_header_layout(&["no-folder"])),
                    "dashboard ready"
                );
                CycleState::Ready
            }
            ReadinessOutcome::PanelFailed { panel_id, cause } => {
                self.stats.panel_failed += 1;
                warn!(identifier, %cycle, elapsed_ms, %panel_id, cause = %cause, "panel reported a data error");
                CycleState::Failed
            }
            ReadinessOutcome::TimedOut {
                stage: TimeoutStage::Dashboard { .. },
                ..
            } => {
                self.stats.timed_out += 1;
                warn!(identifier, %cycle, elapsed_ms, "dashboard did not become active");
                CycleState::TimedOut
            }
            ReadinessOutcome::TimedOut {
                stage: TimeoutStage::Panels { outstanding },
                ..
            } => {
                self.stats.timed_out += 1;
                warn!(
                    identifier,
                    %cycle,
                    elapsed_ms,
                    outstanding = %format_panel_ids(outstanding),
                    "panels did not finish loading"
                );
                CycleState::TimedOut
            }
            ReadinessOutcome::Cancelled { .. } => {
                self.stats.cancelled += 1;
                info!(identifier, %cycle, elapsed_ms, "readiness cycle cancelled");
                CycleState::Cancelled
            }
        };

        let total_stale = self.stats.stale_signals_ignored;
        transition(&self.status_tx, cycle, state, |status| {
            status.outcome = Some(outcome.label().to_owned());
            status.stale_signals_ignored = total_stale;
        });

        self.last_report = Some(CycleReport {
            cycle,
            identifier: identifier.to_owned(),
            outcome: outcome.label().to_owned(),
            elapsed_ms,
            resolved_panels: resolved,
            skipped_panels: skipped,
            counters,
        });
    }
}

fn focus_from_request(mut filter: PanelFilterConfig, request: &DashboardRequest) -> PanelFilterConfig {
    if let Some(panel_id) = &request.focused_panel_id {
        filter.focused_panel_id = Some(panel_id.clone());
    }
    filter
}

/// Move the published status of `cycle` to `next`.
///
/// Every state change goes through [`CycleState::can_advance_to`]; an illegal
/// step is logged and not published.
fn transition(
    status_tx: &watch::Sender<CycleStatus>,
    cycle: CycleToken,
    next: CycleState,
    update: impl FnOnce(&mut CycleStatus),
) -> bool {
    status_tx.send_if_modified(|status| {
        let current = if status.cycle == Some(cycle) {
            status.state
        } else {
            CycleState::Idle
        };
        if !current.can_advance_to(next) {
            warn!(%cycle, from = ?current, to = ?next, "illegal cycle state transition");
            return false;
        }
        status.cycle = Some(cycle);
        status.state = next;
        update(status);
        true
    })
}

/// Settles the published status of a cycle whose future is dropped before
/// it finishes: disarms the canceller, releases the cycle's routes and held
/// signals, and publishes `Cancelled`.
struct InFlight {
    cycle: CycleToken,
    canceller: CycleCanceller,
    hub: SignalHub,
    status_tx: Arc<watch::Sender<CycleStatus>>,
    armed: bool,
}

impl InFlight {
    /// The cycle reached `settle`; nothing left to do on drop.
    fn settled(mut self) {
        self.armed = false;
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.canceller.disarm();
        self.hub.release(self.cycle);
        let in_flight = {
            let status = self.status_tx.borrow();
            status.cycle == Some(self.cycle) && status.state.is_in_flight()
        };
        if in_flight {
            transition(&self.status_tx, self.cycle, CycleState::Cancelled, |status| {
                status.outcome = Some("cancelled".to_owned());
            });
        }
        warn!(cycle = %self.cycle, "readiness cycle dropped before settling");
    }
}
