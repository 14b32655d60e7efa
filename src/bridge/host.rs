//! [`DashboardHost`] backed by a shim that talks to the bridge.
//!
//! The shim reports what the host displays (`host.dashboard_active`,
//! `host.dashboard_cleared`); navigation and time changes go back out as
//! `host.navigate` and `host.set_time_range` events.

use crate::bridge::contract::{EVENT_NAVIGATE, EVENT_SET_TIME_RANGE, EventEnvelope, NavigateEvent};
use crate::error::{ReadyError, Result};
use crate::host::{DashboardHost, NavigationTarget};
use crate::model::{DashboardSnapshot, TimeRange};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use url::Url;

#[derive(Clone)]
pub struct BridgeHost {
    active: Arc<Mutex<Option<DashboardSnapshot>>>,
    event_tx: broadcast::Sender<EventEnvelope>,
    base_url: Option<Url>,
}

impl BridgeHost {
    #[must_use]
    pub fn new(event_tx: broadcast::Sender<EventEnvelope>) -> Self {
        Self {
            active: Arc::new(Mutex::new(None)),
            event_tx,
            base_url: None,
        }
    }

    /// Also send absolute URLs in `host.navigate` events.
    #[must_use]
    pub fn with_base_url(mut self, base_url: Url) -> Self {
        self.base_url = Some(base_url);
        self
    }

    /// Record the dashboard the shim reports as displayed.
    ///
    /// Returns `true` when this activates a different dashboard than the one
    /// recorded before (or none was).
    pub fn set_active(&self, snapshot: DashboardSnapshot) -> bool {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        let fresh = active.as_ref().is_none_or(|previous| previous.uid != snapshot.uid);
        *active = Some(snapshot);
        fresh
    }

    /// The shim reports that no dashboard is displayed (navigation started).
    pub fn clear_active(&self) {
        self.active.lock().unwrap_or_else(|e| e.into_inner()).take();
    }

    fn emit(&self, event: &str, payload: serde_json::Value) -> bool {
        let envelope = EventEnvelope::new(uuid::Uuid::new_v4().to_string(), event, payload);
        self.event_tx.send(envelope).is_ok()
    }
}

impl DashboardHost for BridgeHost {
    fn active_dashboard(&self) -> Option<DashboardSnapshot> {
        self.active.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn navigate(&self, target: &NavigationTarget) -> Result<()> {
        let url = match &self.base_url {
            Some(base) => Some(target.to_url(base)?.to_string()),
            None => None,
        };
        let payload = serde_json::to_value(NavigateEvent {
            path: target.relative(),
            url,
        })
        .map_err(|e| ReadyError::Contract(format!("failed to encode navigate event: {e}")))?;

        if self.emit(EVENT_NAVIGATE, payload) {
            Ok(())
        } else {
            Err(ReadyError::NavigationUnavailable(
                "no host shim is listening for navigation events".to_owned(),
            ))
        }
    }

    fn set_time_range(&self, range: &TimeRange) -> Result<()> {
        let payload = serde_json::to_value(range)
            .map_err(|e| ReadyError::Contract(format!("failed to encode time range: {e}")))?;
        if self.emit(EVENT_SET_TIME_RANGE, payload) {
            Ok(())
        } else {
            Err(ReadyError::Host(
                "no host shim is listening for time range events".to_owned(),
            ))
        }
    }
}
