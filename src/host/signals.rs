//! Panel completion signals and the hub that routes them to readiness cycles.
//!
//! Host adapters [`publish`](SignalHub::publish) every panel event they see.
//! The hub forwards a signal only to panels that currently have a route
//! installed, tagging it with the owning cycle's token.
//!
//! While a cycle is still waiting for its dashboard it has no routes yet.
//! Signals published in that window are held for the cycle (see
//! [`hold`](SignalHub::hold)) and replayed, in arrival order, once
//! [`subscribe_all`](SignalHub::subscribe_all) installs the routes. Any other
//! signal without a route is counted and dropped.

use crate::model::{CycleToken, PanelId};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Upper bound on signals held for a cycle that has no routes yet.
const MAX_HELD_SIGNALS: usize = 4096;

/// What a panel reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SignalKind {
    /// Data received / render complete.
    Success,
    /// Data error, with the host-supplied cause.
    Failure {
        #[serde(default)]
        cause: String,
    },
}

/// One host-emitted panel event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanelSignal {
    pub panel_id: PanelId,
    #[serde(flatten)]
    pub kind: SignalKind,
}

impl PanelSignal {
    #[must_use]
    pub fn success(panel_id: impl Into<PanelId>) -> Self {
        Self {
            panel_id: panel_id.into(),
            kind: SignalKind::Success,
        }
    }

    #[must_use]
    pub fn failure(panel_id: impl Into<PanelId>, cause: impl Into<String>) -> Self {
        Self {
            panel_id: panel_id.into(),
            kind: SignalKind::Failure {
                cause: cause.into(),
            },
        }
    }
}

/// A signal as delivered to a cycle, tagged with the route's cycle token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedSignal {
    pub cycle: CycleToken,
    pub signal: PanelSignal,
}

/// Delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubStats {
    pub published: u64,
    pub delivered: u64,
    pub unrouted: u64,
    /// Signals held for a cycle still waiting for its dashboard.
    pub held: u64,
    /// Held signals later handed to a route.
    pub replayed: u64,
}

struct Route {
    cycle: CycleToken,
    panel_key: String,
    tx: mpsc::UnboundedSender<RoutedSignal>,
}

struct Held {
    cycle: CycleToken,
    signals: VecDeque<PanelSignal>,
}

#[derive(Default)]
struct HubInner {
    routes: Vec<Route>,
    held: Option<Held>,
    stats: HubStats,
}

/// Shared router between host adapters and the readiness aggregator.
#[derive(Clone, Default)]
pub struct SignalHub {
    inner: Arc<Mutex<HubInner>>,
}

impl SignalHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold unrouted signals for `cycle` until its routes are installed.
    ///
    /// Replaces whatever an earlier cycle was holding.
    pub fn hold(&self, cycle: CycleToken) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = inner.held.replace(Held {
            cycle,
            signals: VecDeque::new(),
        }) && !previous.signals.is_empty()
        {
            tracing::debug!(
                cycle = %previous.cycle,
                dropped = previous.signals.len(),
                "dropping signals held for an earlier cycle"
            );
        }
    }

    /// Forget signals held so far, keeping the hold open.
    ///
    /// Host adapters call this when the host reports a newly activated
    /// dashboard: anything published before that belongs to the previous one.
    pub fn discard_held(&self) -> usize {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.held.as_mut().map_or(0, |held| {
            let dropped = held.signals.len();
            held.signals.clear();
            dropped
        })
    }

    /// Install one route per panel for `cycle` in a single pass, then replay
    /// the signals held for `cycle` whose panel now has a route.
    ///
    /// Ends the hold. Returns the number of signals replayed.
    pub fn subscribe_all(
        &self,
        cycle: CycleToken,
        panel_ids: &[PanelId],
        tx: &mpsc::UnboundedSender<RoutedSignal>,
    ) -> usize {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let keys: Vec<String> = panel_ids.iter().map(PanelId::canonical).collect();
        for key in &keys {
            inner.routes.push(Route {
                cycle,
                panel_key: key.clone(),
                tx: tx.clone(),
            });
        }

        let held = match inner.held.take() {
            Some(held) if held.cycle == cycle => held.signals,
            other => {
                inner.held = other;
                return 0;
            }
        };

        let mut replayed = 0;
        for signal in held {
            if !keys.contains(&signal.panel_id.canonical()) {
                continue;
            }
            if tx.send(RoutedSignal { cycle, signal }).is_ok() {
                replayed += 1;
            }
        }
        inner.stats.replayed += replayed as u64;
        inner.stats.delivered += replayed as u64;
        replayed
    }

    /// Remove every route owned by `cycle`. Returns how many were removed.
    pub fn release(&self, cycle: CycleToken) -> usize {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.held.as_ref().is_some_and(|held| held.cycle == cycle) {
            inner.held = None;
        }
        let before = inner.routes.len();
        inner.routes.retain(|route| route.cycle != cycle);
        before - inner.routes.len()
    }

    /// Forward a host signal to every route installed for its panel.
    ///
    /// Returns the number of routes that accepted the signal. A signal with
    /// no route is held when a cycle is waiting for its dashboard.
    pub fn publish(&self, signal: PanelSignal) -> usize {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let key = signal.panel_id.canonical();
        inner.stats.published += 1;

        let mut delivered = 0;
        inner.routes.retain(|route| {
            if route.panel_key != key {
                return true;
            }
            let routed = RoutedSignal {
                cycle: route.cycle,
                signal: signal.clone(),
            };
            if route.tx.send(routed).is_ok() {
                delivered += 1;
                true
            } else {
                // Receiver gone; the cycle can no longer observe anything.
                false
            }
        });

        inner.stats.delivered += delivered as u64;
        if delivered > 0 {
            return delivered;
        }

        if let Some(held) = inner.held.as_mut() {
            if held.signals.len() == MAX_HELD_SIGNALS {
                held.signals.pop_front();
            }
            tracing::trace!(cycle = %held.cycle, panel_id = %signal.panel_id, "holding panel signal until routes exist");
            held.signals.push_back(signal);
            inner.stats.held += 1;
        } else {
            inner.stats.unrouted += 1;
            tracing::trace!(panel_id = %signal.panel_id, "panel signal has no route; dropped");
        }
        0
    }

    /// Number of installed routes across all cycles.
    #[must_use]
    pub fn active_routes(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .routes
            .len()
    }

    #[must_use]
    pub fn stats(&self) -> HubStats {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).stats
    }
}
