//! Aggregate per-panel completion signals into one outcome.
//!
//! [`PanelTally`] is the pure bookkeeping; [`ReadinessAggregator`] wires it
//! to the [`SignalHub`] and the cycle deadline.

use crate::host::signals::{PanelSignal, RoutedSignal, SignalHub, SignalKind};
use crate::model::{ActiveDashboard, CycleToken, PanelDescriptor, PanelId, ReadinessOutcome, TimeoutStage};
use crate::readiness::cycle::CycleContext;
use crate::readiness::resolver::PanelSet;
use std::collections::HashSet;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Why a signal did not change the tally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// The panel already reported in this cycle.
    Duplicate,
    /// The panel is not in the expected set.
    UnknownPanel,
    /// The tally has already settled.
    AlreadySettled,
}

/// Result of applying one signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TallyStep {
    Pending { outstanding: usize },
    AllReady,
    Failed { panel_id: PanelId, cause: String },
    Ignored(IgnoreReason),
}

/// Single-fire bookkeeping over an expected panel set.
#[derive(Debug, Clone)]
pub struct PanelTally {
    panels: Vec<(String, PanelId)>,
    reported: HashSet<String>,
    settled: bool,
}

impl PanelTally {
    #[must_use]
    pub fn new(panels: &[PanelDescriptor]) -> Self {
        let mut seen = HashSet::new();
        let panels = panels
            .iter()
            .filter_map(|panel| {
                let key = panel.id.canonical();
                seen.insert(key.clone()).then(|| (key, panel.id.clone()))
            })
            .collect();
        Self {
            panels,
            reported: HashSet::new(),
            settled: false,
        }
    }

    /// True when nothing is outstanding (including the empty set).
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.reported.len() == self.panels.len()
    }

    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.settled
    }

    #[must_use]
    pub fn outstanding_count(&self) -> usize {
        self.panels.len() - self.reported.len()
    }

    /// Panels that have not reported, in display order.
    #[must_use]
    pub fn outstanding(&self) -> Vec<PanelId> {
        self.panels
            .iter()
            .filter(|(key, _)| !self.reported.contains(key))
            .map(|(_, id)| id.clone())
            .collect()
    }

    /// Apply a signal. The first signal per panel wins; a failure settles
    /// the tally immediately.
    pub fn apply(&mut self, signal: &PanelSignal) -> TallyStep {
        if self.settled {
            return TallyStep::Ignored(IgnoreReason::AlreadySettled);
        }
        let key = signal.panel_id.canonical();
        if !self.panels.iter().any(|(k, _)| *k == key) {
            return TallyStep::Ignored(IgnoreReason::UnknownPanel);
        }
        if !self.reported.insert(key) {
            return TallyStep::Ignored(IgnoreReason::Duplicate);
        }

        match &signal.kind {
            SignalKind::Failure { cause } => {
                self.settled = true;
                TallyStep::Failed {
                    panel_id: signal.panel_id.clone(),
                    cause: cause.clone(),
                }
            }
            SignalKind::Success if self.is_complete() => {
                self.settled = true;
                TallyStep::AllReady
            }
            SignalKind::Success => TallyStep::Pending {
                outstanding: self.outstanding_count(),
            },
        }
    }
}

/// Channel pair that carries routed signals into the owning gate.
///
/// Lives as long as the gate, so signals queued for a settled cycle are
/// still observable (and discarded) by the next one.
pub struct SignalInbox {
    tx: mpsc::UnboundedSender<RoutedSignal>,
    rx: mpsc::UnboundedReceiver<RoutedSignal>,
}

impl Default for SignalInbox {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalInbox {
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx }
    }

    /// Discard everything queued that does not belong to `current`.
    /// Returns the number discarded.
    pub fn discard_stale(&mut self, current: CycleToken) -> u64 {
        let mut discarded = 0;
        let mut keep = Vec::new();
        while let Ok(routed) = self.rx.try_recv() {
            if routed.cycle == current {
                keep.push(routed);
            } else {
                trace!(stale = %routed.cycle, %current, panel_id = %routed.signal.panel_id, "discarding stale signal");
                discarded += 1;
            }
        }
        for routed in keep {
            // Re-queue; the receiver is held by `self`, so this cannot fail.
            let _ = self.tx.send(routed);
        }
        discarded
    }
}

/// Releases a cycle's routes when dropped, whichever way the wait ends.
struct RouteGuard<'a> {
    hub: &'a SignalHub,
    cycle: CycleToken,
}

impl Drop for RouteGuard<'_> {
    fn drop(&mut self) {
        let released = self.hub.release(self.cycle);
        trace!(cycle = %self.cycle, released, "released panel routes");
    }
}

/// Waits for every expected panel to report, failing fast on the first error.
pub struct ReadinessAggregator<'a> {
    hub: &'a SignalHub,
    inbox: &'a mut SignalInbox,
}

impl<'a> ReadinessAggregator<'a> {
    #[must_use]
    pub fn new(hub: &'a SignalHub, inbox: &'a mut SignalInbox) -> Self {
        Self { hub, inbox }
    }

    /// Await all panels in `panels` within the context's deadline.
    ///
    /// Routes are installed in one synchronous pass before the first
    /// suspension point and released on every exit path.
    pub async fn await_all(
        &mut self,
        ctx: &mut CycleContext,
        dashboard: ActiveDashboard,
        panels: &PanelSet,
    ) -> ReadinessOutcome {
        let cycle = ctx.token();
        let mut tally = PanelTally::new(panels.expected());

        let _routes = RouteGuard {
            hub: self.hub,
            cycle,
        };
        let ids: Vec<PanelId> = panels.expected().iter().map(|panel| panel.id.clone()).collect();
        let replayed = self.hub.subscribe_all(cycle, &ids, &self.inbox.tx);
        if replayed > 0 {
            debug!(%cycle, replayed, "replayed signals that arrived before routes were installed");
        }

        if tally.is_complete() {
            debug!(%cycle, "no panels to wait for; ready");
            return ReadinessOutcome::Ready(dashboard);
        }

        let deadline = ctx.deadline();
        let expiry = tokio::time::sleep_until(deadline.expires_at());
        tokio::pin!(expiry);

        loop {
            tokio::select! {
                biased;
                _ = ctx.cancel_token().cancelled() => {
                    return ReadinessOutcome::Cancelled { elapsed: deadline.elapsed() };
                }
                routed = self.inbox.rx.recv() => {
                    let Some(routed) = routed else {
                        // Unreachable while the inbox holds its sender.
                        (&mut expiry).await;
                        return timed_out(&tally, deadline.elapsed());
                    };
                    if routed.cycle != cycle {
                        ctx.counters.stale_ignored += 1;
                        trace!(%cycle, stale = %routed.cycle, "ignoring stale signal");
                        continue;
                    }
                    match tally.apply(&routed.signal) {
                        TallyStep::Pending { outstanding } => {
                            ctx.counters.applied += 1;
                            debug!(%cycle, panel_id = %routed.signal.panel_id, outstanding, "panel reported");
                        }
                        TallyStep::AllReady => {
                            ctx.counters.applied += 1;
                            return ReadinessOutcome::Ready(dashboard);
                        }
                        TallyStep::Failed { panel_id, cause } => {
                            ctx.counters.applied += 1;
                            return ReadinessOutcome::PanelFailed { panel_id, cause };
                        }
                        TallyStep::Ignored(IgnoreReason::UnknownPanel) => {
                            ctx.counters.foreign_ignored += 1;
                        }
                        TallyStep::Ignored(_) => {
                            ctx.counters.duplicates_ignored += 1;
                            trace!(%cycle, panel_id = %routed.signal.panel_id, "duplicate signal ignored");
                        }
                    }
                }
                _ = &mut expiry => {
                    return timed_out(&tally, deadline.elapsed());
                }
            }
        }
    }
}

fn timed_out(tally: &PanelTally, elapsed: std::time::Duration) -> ReadinessOutcome {
    ReadinessOutcome::TimedOut {
        elapsed,
        stage: TimeoutStage::Panels {
            outstanding: tally.outstanding(),
        },
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::model::DashboardSnapshot;
    use std::time::Duration;
    use tokio::time::Instant;
    use tokio_util::sync::CancellationToken;

    fn panels(ids: &[i64]) -> Vec<PanelDescriptor> {
        ids.iter().map(|id| PanelDescriptor::new(*id, "graph")).collect()
    }

    fn context(token: u64, budget_ms: u64) -> CycleContext {
        CycleContext::new(
            CycleToken(token),
            Duration::from_millis(budget_ms),
            CancellationToken::new(),
        )
    }

    fn dashboard(token: u64, panels: Vec<PanelDescriptor>) -> ActiveDashboard {
        ActiveDashboard::acquire(CycleToken(token), DashboardSnapshot::new("abc", panels))
    }

    #[test]
    fn tally_ready_regardless_of_order() {
        let orders: [[i64; 3]; 3] = [[1, 2, 3], [3, 1, 2], [2, 3, 1]];
        for order in orders {
            let mut tally = PanelTally::new(&panels(&[1, 2, 3]));
            let steps: Vec<_> = order
                .iter()
                .map(|id| tally.apply(&PanelSignal::success(*id)))
                .collect();
            assert_eq!(
                steps,
                vec![
                    TallyStep::Pending { outstanding: 2 },
                    TallyStep::Pending { outstanding: 1 },
                    TallyStep::AllReady,
                ]
            );
        }
    }

    #[test]
    fn tally_duplicates_do_not_underflow() {
        let mut tally = PanelTally::new(&panels(&[1, 2]));
        assert_eq!(
            tally.apply(&PanelSignal::success(1)),
            TallyStep::Pending { outstanding: 1 }
        );
        for _ in 0..5 {
            assert_eq!(
                tally.apply(&PanelSignal::success(1)),
                TallyStep::Ignored(IgnoreReason::Duplicate)
            );
        }
        assert_eq!(tally.outstanding_count(), 1);
        assert_eq!(tally.outstanding(), vec![PanelId::Num(2)]);
        assert_eq!(tally.apply(&PanelSignal::success(2)), TallyStep::AllReady);
        assert_eq!(
            tally.apply(&PanelSignal::success(2)),
            TallyStep::Ignored(IgnoreReason::AlreadySettled)
        );
    }

    #[test]
    fn tally_first_signal_per_panel_wins() {
        let mut tally = PanelTally::new(&panels(&[1, 2]));
        tally.apply(&PanelSignal::success(1));
        assert_eq!(
            tally.apply(&PanelSignal::failure(1, "late error")),
            TallyStep::Ignored(IgnoreReason::Duplicate)
        );
        assert!(!tally.is_settled());
    }

    #[test]
    fn tally_fails_fast() {
        let mut tally = PanelTally::new(&panels(&[1, 2, 3]));
        assert_eq!(
            tally.apply(&PanelSignal::failure(2, "timeout")),
            TallyStep::Failed {
                panel_id: PanelId::Num(2),
                cause: "timeout".to_owned()
            }
        );
        assert_eq!(
            tally.apply(&PanelSignal::success(1)),
            TallyStep::Ignored(IgnoreReason::AlreadySettled)
        );
    }

    #[test]
    fn tally_collapses_duplicate_descriptors() {
        let tally = PanelTally::new(&[PanelDescriptor::new(1, "graph"), PanelDescriptor::new("1", "graph")]);
        assert_eq!(tally.outstanding_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_set_is_ready_immediately() {
        let hub = SignalHub::new();
        let mut inbox = SignalInbox::new();
        let mut ctx = context(1, 1_000);
        let start = Instant::now();

        let outcome = ReadinessAggregator::new(&hub, &mut inbox)
            .await_all(&mut ctx, dashboard(1, vec![]), &PanelSet::default())
            .await;

        assert!(outcome.is_ready());
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(hub.active_routes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn all_success_settles_ready_once() {
        let hub = SignalHub::new();
        let mut inbox = SignalInbox::new();
        let mut ctx = context(1, 1_000);
        let set = PanelSet::of(panels(&[1, 2]));

        let publisher = hub.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            publisher.publish(PanelSignal::success(2));
            publisher.publish(PanelSignal::success(2));
            tokio::time::sleep(Duration::from_millis(10)).await;
            publisher.publish(PanelSignal::success(1));
        });

        let start = Instant::now();
        let outcome = ReadinessAggregator::new(&hub, &mut inbox)
            .await_all(&mut ctx, dashboard(1, panels(&[1, 2])), &set)
            .await;

        assert!(outcome.is_ready());
        assert_eq!(start.elapsed(), Duration::from_millis(20));
        assert_eq!(ctx.counters().applied, 2);
        assert_eq!(ctx.counters().duplicates_ignored, 1);
        assert_eq!(hub.active_routes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_settles_without_waiting_for_the_rest() {
        let hub = SignalHub::new();
        let mut inbox = SignalInbox::new();
        let mut ctx = context(1, 5_000);
        let set = PanelSet::of(panels(&[1, 2, 3]));

        let publisher = hub.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            publisher.publish(PanelSignal::success(1));
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher.publish(PanelSignal::failure(3, "datasource unreachable"));
        });

        let start = Instant::now();
        let outcome = ReadinessAggregator::new(&hub, &mut inbox)
            .await_all(&mut ctx, dashboard(1, panels(&[1, 2, 3])), &set)
            .await;

        assert_eq!(
            outcome,
            ReadinessOutcome::PanelFailed {
                panel_id: PanelId::Num(3),
                cause: "datasource unreachable".to_owned()
            }
        );
        assert_eq!(start.elapsed(), Duration::from_millis(50));
        assert_eq!(hub.active_routes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_panel_times_out_with_outstanding_list() {
        let hub = SignalHub::new();
        let mut inbox = SignalInbox::new();
        let mut ctx = context(1, 300);
        let set = PanelSet::of(panels(&[1, 2]));

        let publisher = hub.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            publisher.publish(PanelSignal::success(1));
        });

        let outcome = ReadinessAggregator::new(&hub, &mut inbox)
            .await_all(&mut ctx, dashboard(1, panels(&[1, 2])), &set)
            .await;

        assert_eq!(
            outcome,
            ReadinessOutcome::TimedOut {
                elapsed: Duration::from_millis(300),
                stage: TimeoutStage::Panels {
                    outstanding: vec![PanelId::Num(2)]
                },
            }
        );
        assert_eq!(hub.active_routes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_signals_are_counted_and_ignored() {
        let hub = SignalHub::new();
        let mut inbox = SignalInbox::new();

        // A signal left behind by cycle 1 after its routes were released.
        inbox
            .tx
            .send(RoutedSignal {
                cycle: CycleToken(1),
                signal: PanelSignal::failure(1, "stale"),
            })
            .unwrap();

        let mut ctx = context(2, 1_000);
        let set = PanelSet::of(panels(&[1]));
        let publisher = hub.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            publisher.publish(PanelSignal::success(1));
        });

        let outcome = ReadinessAggregator::new(&hub, &mut inbox)
            .await_all(&mut ctx, dashboard(2, panels(&[1])), &set)
            .await;

        assert!(outcome.is_ready());
        assert_eq!(ctx.counters().stale_ignored, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_wait_releases_routes() {
        let hub = SignalHub::new();
        let mut inbox = SignalInbox::new();
        let mut ctx = context(1, 10_000);
        let set = PanelSet::of(panels(&[1, 2]));

        let result = tokio::time::timeout(Duration::from_millis(50), async {
            ReadinessAggregator::new(&hub, &mut inbox)
                .await_all(&mut ctx, dashboard(1, panels(&[1, 2])), &set)
                .await
        })
        .await;

        assert!(result.is_err());
        assert_eq!(hub.active_routes(), 0);
    }

    #[test]
    fn discard_stale_keeps_current_cycle() {
        let mut inbox = SignalInbox::new();
        for cycle in [1, 2, 1] {
            inbox
                .tx
                .send(RoutedSignal {
                    cycle: CycleToken(cycle),
                    signal: PanelSignal::success(1),
                })
                .unwrap();
        }
        assert_eq!(inbox.discard_stale(CycleToken(2)), 2);
        let kept = inbox.rx.try_recv().unwrap();
        assert_eq!(kept.cycle, CycleToken(2));
        assert!(inbox.rx.try_recv().is_err());
    }
}
