//! End-to-end readiness cycles against a scripted host, on paused time.

use chrono::{TimeZone, Utc};
use dashready::readiness::CycleState;
use dashready::{
    DashboardHost, DashboardRequest, DashboardSnapshot, NavigationTarget, PanelDescriptor,
    PanelFilterConfig, PanelId, PanelSignal, ReadinessGate, ReadinessOutcome, ReadyConfig,
    ReadyError, SignalHub, TimeRange, TimeoutStage,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Default)]
struct ScriptedHost {
    active: Mutex<Option<DashboardSnapshot>>,
    navigations: Mutex<Vec<NavigationTarget>>,
    ranges: Mutex<Vec<TimeRange>>,
}

impl ScriptedHost {
    fn show(&self, snapshot: DashboardSnapshot) {
        *self.active.lock().expect("lock active") = Some(snapshot);
    }

    /// Show `snapshot` after `delay` of virtual time.
    fn show_after(self: &Arc<Self>, delay: Duration, snapshot: DashboardSnapshot) {
        let host = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            host.show(snapshot);
        });
    }
}

impl DashboardHost for ScriptedHost {
    fn active_dashboard(&self) -> Option<DashboardSnapshot> {
        self.active.lock().expect("lock active").clone()
    }

    fn navigate(&self, target: &NavigationTarget) -> dashready::Result<()> {
        self.navigations
            .lock()
            .expect("lock navigations")
            .push(target.clone());
        Ok(())
    }

    fn set_time_range(&self, range: &TimeRange) -> dashready::Result<()> {
        self.ranges.lock().expect("lock ranges").push(range.clone());
        Ok(())
    }
}

/// Publish signals at the given offsets from now. Entries sharing an offset
/// are published back to back without yielding.
fn publish_at(hub: &SignalHub, schedule: Vec<(u64, PanelSignal)>) {
    let hub = hub.clone();
    tokio::spawn(async move {
        let start = Instant::now();
        for (at_ms, signal) in schedule {
            let at = start + Duration::from_millis(at_ms);
            if Instant::now() < at {
                tokio::time::sleep_until(at).await;
            }
            hub.publish(signal);
        }
    });
}

fn x1() -> DashboardSnapshot {
    let mut snapshot = DashboardSnapshot::new(
        "X1",
        vec![
            PanelDescriptor::new(1, "timeseries"),
            PanelDescriptor::new(2, "graph"),
            PanelDescriptor::new(3, "map"),
        ],
    );
    snapshot.title = "Air quality".to_owned();
    snapshot.folder_title = Some("Luftdaten".to_owned());
    snapshot
}

fn gate_for(host: &Arc<ScriptedHost>, hub: &SignalHub) -> ReadinessGate<Arc<ScriptedHost>> {
    ReadinessGate::new(Arc::clone(host), hub.clone(), ReadyConfig::default())
}

#[tokio::test(start_paused = true)]
async fn dashboard_with_excluded_panel_is_ready_when_last_panel_reports() {
    let host = Arc::new(ScriptedHost::default());
    let hub = SignalHub::new();
    let mut gate = gate_for(&host, &hub);

    host.show_after(Duration::from_millis(80), x1());
    publish_at(
        &hub,
        vec![
            (120, PanelSignal::success(2)),
            (140, PanelSignal::success(3)),
        ],
    );

    let start = Instant::now();
    let outcome = gate
        .open_and_await_ready(
            &DashboardRequest::new("X1"),
            &PanelFilterConfig::excluding(["timeseries"]),
            Duration::from_secs(20),
        )
        .await;

    assert_eq!(start.elapsed(), Duration::from_millis(140));
    let ReadinessOutcome::Ready(dashboard) = outcome else {
        panic!("expected ready, got {outcome:?}");
    };
    assert_eq!(dashboard.identifier(), "X1");
    assert_eq!(dashboard.display_title(false), "Luftdaten / Air quality");

    let report = gate.last_report().expect("report recorded");
    assert_eq!(report.resolved_panels, 2);
    assert_eq!(report.skipped_panels, 1);
    assert_eq!(report.elapsed_ms, 140);
    assert_eq!(report.counters.applied, 2);

    let navigations = host.navigations.lock().expect("lock navigations");
    assert_eq!(navigations.len(), 1);
    assert_eq!(navigations[0].relative(), "/d/X1/dashboard");

    assert!(gate.status_handle().is_ready());
    assert_eq!(hub.active_routes(), 0);
}

#[tokio::test(start_paused = true)]
async fn leftover_signal_from_failed_cycle_is_counted_as_stale() {
    let host = Arc::new(ScriptedHost::default());
    host.show(DashboardSnapshot::new(
        "X1",
        vec![PanelDescriptor::new(1, "graph"), PanelDescriptor::new(2, "graph")],
    ));
    let hub = SignalHub::new();
    let mut gate = gate_for(&host, &hub);
    let filter = PanelFilterConfig::default();

    publish_at(
        &hub,
        vec![
            (10, PanelSignal::failure(1, "query timeout")),
            (10, PanelSignal::success(2)),
        ],
    );
    let first = gate
        .open_and_await_ready(&DashboardRequest::new("X1"), &filter, Duration::from_secs(5))
        .await;
    assert_eq!(
        first,
        ReadinessOutcome::PanelFailed {
            panel_id: PanelId::Num(1),
            cause: "query timeout".to_owned()
        }
    );

    publish_at(
        &hub,
        vec![(20, PanelSignal::success(1)), (20, PanelSignal::success(2))],
    );
    let second = gate
        .open_and_await_ready(&DashboardRequest::new("X1"), &filter, Duration::from_secs(5))
        .await;
    assert!(second.is_ready(), "got {second:?}");

    assert_eq!(gate.last_report().expect("report").counters.stale_ignored, 1);
    assert_eq!(gate.stats().stale_signals_ignored, 1);
    assert_eq!(gate.status_handle().snapshot().stale_signals_ignored, 1);
    assert_eq!(gate.stats().panel_failed, 1);
    assert_eq!(gate.stats().ready, 1);
}

#[tokio::test(start_paused = true)]
async fn dashboard_that_never_appears_times_out() {
    let host = Arc::new(ScriptedHost::default());
    host.show(DashboardSnapshot::new("X10", vec![]));
    let mut config = ReadyConfig::default();
    config.timing.dashboard_deadline_ms = 500;
    let mut gate = ReadinessGate::new(Arc::clone(&host), SignalHub::new(), config);

    let start = Instant::now();
    let outcome = gate.open(&DashboardRequest::new("X1")).await;
    let elapsed = start.elapsed();

    assert!(elapsed >= Duration::from_millis(500), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_millis(600), "elapsed {elapsed:?}");
    assert!(matches!(
        outcome,
        ReadinessOutcome::TimedOut {
            stage: TimeoutStage::Dashboard { .. },
            ..
        }
    ));

    let err = outcome.into_result("X1").unwrap_err();
    assert!(matches!(err, ReadyError::DashboardTimeout { ref identifier, .. } if identifier == "X1"));
    assert_eq!(gate.status_handle().snapshot().state, CycleState::TimedOut);
}

#[tokio::test(start_paused = true)]
async fn focused_panel_that_does_not_exist_is_vacuously_ready() {
    let host = Arc::new(ScriptedHost::default());
    host.show(x1());
    let hub = SignalHub::new();
    let mut gate = gate_for(&host, &hub);

    let request = DashboardRequest::new("X1").with_focused_panel(99);
    let outcome = gate.open(&request).await;

    assert!(outcome.is_ready());
    assert_eq!(gate.last_report().expect("report").resolved_panels, 0);
    let navigations = host.navigations.lock().expect("lock navigations");
    assert_eq!(navigations[0].relative(), "/d/X1/dashboard?panelId=99&fullscreen");
}

#[tokio::test(start_paused = true)]
async fn advance_time_steps_through_ranges() {
    let host = Arc::new(ScriptedHost::default());
    host.show(x1());
    let hub = SignalHub::new();
    let mut gate = gate_for(&host, &hub);
    let filter = PanelFilterConfig::excluding(["timeseries"]);

    publish_at(
        &hub,
        vec![(5, PanelSignal::success(2)), (5, PanelSignal::success(3))],
    );
    let opened = gate
        .open_and_await_ready(&DashboardRequest::new("X1"), &filter, Duration::from_secs(5))
        .await;
    assert!(opened.is_ready());

    let step = TimeRange::from_datetimes(
        Utc.with_ymd_and_hms(2018, 10, 1, 0, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2018, 10, 1, 1, 0, 0).unwrap(),
    );
    publish_at(
        &hub,
        vec![(30, PanelSignal::success(3)), (50, PanelSignal::success(2))],
    );
    let start = Instant::now();
    let advanced = gate
        .advance_time(&step, &filter, Duration::from_secs(5))
        .await
        .expect("advance starts");

    assert!(advanced.is_ready());
    assert_eq!(start.elapsed(), Duration::from_millis(50));
    assert_eq!(host.ranges.lock().expect("lock ranges").as_slice(), &[step]);
    assert_eq!(host.navigations.lock().expect("lock navigations").len(), 1);
    assert_eq!(gate.stats().cycles, 2);
}

#[tokio::test(start_paused = true)]
async fn panel_that_never_reports_is_named_in_timeout() {
    let host = Arc::new(ScriptedHost::default());
    host.show(x1());
    let hub = SignalHub::new();
    let mut gate = gate_for(&host, &hub);

    publish_at(&hub, vec![(10, PanelSignal::success(2))]);
    let outcome = gate
        .open_and_await_ready(
            &DashboardRequest::new("X1"),
            &PanelFilterConfig::excluding(["timeseries"]),
            Duration::from_secs(2),
        )
        .await;

    let err = outcome.into_result("X1").unwrap_err();
    match err {
        ReadyError::ReadinessTimeout {
            identifier,
            outstanding,
            elapsed_ms,
        } => {
            assert_eq!(identifier, "X1");
            assert_eq!(outstanding, vec![PanelId::Num(3)]);
            assert_eq!(elapsed_ms, 2_000);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn status_watchers_see_the_cycle_settle() {
    let host = Arc::new(ScriptedHost::default());
    host.show(x1());
    let hub = SignalHub::new();
    let mut gate = gate_for(&host, &hub);
    let mut status = gate.status_handle();
    let canceller = gate.canceller();

    let watcher = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(status.snapshot().state, CycleState::AwaitingPanels);
        assert_eq!(status.snapshot().expected_panels, 2);
        canceller.cancel();
        status.settled().await
    });

    let outcome = gate
        .open_and_await_ready(
            &DashboardRequest::new("X1"),
            &PanelFilterConfig::excluding(["timeseries"]),
            Duration::from_secs(5),
        )
        .await;

    assert_eq!(
        outcome,
        ReadinessOutcome::Cancelled {
            elapsed: Duration::from_millis(40)
        }
    );
    let settled = watcher.await.expect("watcher task").expect("gate alive");
    assert_eq!(settled.state, CycleState::Cancelled);
    assert_eq!(settled.outcome.as_deref(), Some("cancelled"));
}

#[tokio::test(start_paused = true)]
async fn panels_reporting_before_the_next_poll_are_not_lost() {
    let host = Arc::new(ScriptedHost::default());
    let hub = SignalHub::new();
    let mut gate = gate_for(&host, &hub);

    // Active at 10 ms; both panels report before the 100 ms poll sees it.
    host.show_after(Duration::from_millis(10), x1());
    publish_at(
        &hub,
        vec![
            (50, PanelSignal::success(2)),
            (60, PanelSignal::success(3)),
        ],
    );

    let start = Instant::now();
    let outcome = gate
        .open_and_await_ready(
            &DashboardRequest::new("X1"),
            &PanelFilterConfig::excluding(["timeseries"]),
            Duration::from_secs(20),
        )
        .await;

    assert!(outcome.is_ready(), "got {outcome:?}");
    assert_eq!(start.elapsed(), Duration::from_millis(100));
    let stats = hub.stats();
    assert_eq!(stats.held, 2);
    assert_eq!(stats.replayed, 2);
    assert_eq!(stats.unrouted, 0);
    assert_eq!(gate.last_report().expect("report").counters.applied, 2);
}

#[tokio::test(start_paused = true)]
async fn signals_left_over_from_a_settled_cycle_are_not_held() {
    let host = Arc::new(ScriptedHost::default());
    host.show(x1());
    let hub = SignalHub::new();
    let mut gate = gate_for(&host, &hub);
    let filter = PanelFilterConfig::excluding(["timeseries"]);

    publish_at(
        &hub,
        vec![(5, PanelSignal::success(2)), (5, PanelSignal::success(3))],
    );
    let first = gate
        .open_and_await_ready(&DashboardRequest::new("X1"), &filter, Duration::from_secs(5))
        .await;
    assert!(first.is_ready());

    // Late refresh of the first cycle, published while the gate is idle.
    hub.publish(PanelSignal::failure(3, "late"));
    assert_eq!(hub.stats().unrouted, 1);

    publish_at(
        &hub,
        vec![(5, PanelSignal::success(2)), (5, PanelSignal::success(3))],
    );
    let second = gate
        .open_and_await_ready(&DashboardRequest::new("X1"), &filter, Duration::from_secs(5))
        .await;
    assert!(second.is_ready(), "got {second:?}");
}

#[tokio::test(start_paused = true)]
async fn route_focus_matches_the_filter_used_for_readiness() {
    let host = Arc::new(ScriptedHost::default());
    host.show(x1());
    let hub = SignalHub::new();
    let mut config = ReadyConfig::default();
    config.view.panel_id = Some(PanelId::Num(3));
    let mut gate = ReadinessGate::new(Arc::clone(&host), hub.clone(), config);

    publish_at(
        &hub,
        vec![(5, PanelSignal::success(2)), (5, PanelSignal::success(3))],
    );
    let outcome = gate
        .open_and_await_ready(
            &DashboardRequest::new("X1"),
            &PanelFilterConfig::excluding(["timeseries"]),
            Duration::from_secs(5),
        )
        .await;
    assert!(outcome.is_ready());
    assert_eq!(gate.last_report().expect("report").resolved_panels, 2);

    // The configured `panel-id` reaches the route only through `open`,
    // which also resolves just that panel.
    publish_at(&hub, vec![(5, PanelSignal::success(3))]);
    let focused = gate.open(&DashboardRequest::new("X1")).await;
    assert!(focused.is_ready());
    assert_eq!(gate.last_report().expect("report").resolved_panels, 1);

    let navigations = host.navigations.lock().expect("lock navigations");
    assert_eq!(navigations[0].relative(), "/d/X1/dashboard");
    assert_eq!(navigations[1].relative(), "/d/X1/dashboard?panelId=3&fullscreen");
}
