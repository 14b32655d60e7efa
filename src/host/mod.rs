//! Host adapter seam.
//!
//! The readiness core talks to the dashboard application only through
//! [`DashboardHost`] and the [`signals::SignalHub`]. Host-version quirks
//! belong in adapters (see [`crate::bridge::host::BridgeHost`]).

pub mod signals;

use crate::error::{ReadyError, Result};
use crate::model::{DashboardSnapshot, TimeRange};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use url::Url;

/// Where the host should navigate: a route path plus query parameters.
///
/// A parameter without a value renders as a bare flag (`&fullscreen`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationTarget {
    pub path: String,
    #[serde(default)]
    pub query: Vec<(String, Option<String>)>,
}

impl NavigationTarget {
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            query: Vec::new(),
        }
    }

    #[must_use]
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), Some(value.into())));
        self
    }

    #[must_use]
    pub fn flag(mut self, key: impl Into<String>) -> Self {
        self.query.push((key.into(), None));
        self
    }

    /// Host-relative form, e.g. `/d/abc/dashboard?panelId=2&fullscreen`.
    #[must_use]
    pub fn relative(&self) -> String {
        if self.query.is_empty() {
            return self.path.clone();
        }
        let query = self
            .query
            .iter()
            .map(|(key, value)| match value {
                Some(value) => format!(
                    "{}={}",
                    urlencoding::encode(key),
                    urlencoding::encode(value)
                ),
                None => urlencoding::encode(key).into_owned(),
            })
            .collect::<Vec<_>>()
            .join("&");
        format!("{}?{query}", self.path)
    }

    /// Absolute URL below `base`, keeping any sub-path the host is served on.
    pub fn to_url(&self, base: &Url) -> Result<Url> {
        let mut base = base.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        base.join(self.relative().trim_start_matches('/'))
            .map_err(|e| ReadyError::Config(format!("invalid navigation target: {e}")))
    }
}

/// Narrow query/command interface onto the dashboard application.
///
/// Implementations must be cheap to call: the waiter polls
/// [`active_dashboard`](Self::active_dashboard) every poll interval.
pub trait DashboardHost: Send + Sync + 'static {
    /// The dashboard currently displayed, or `None` between navigations.
    fn active_dashboard(&self) -> Option<DashboardSnapshot>;

    /// Ask the host to navigate. Completion is observed by polling.
    fn navigate(&self, target: &NavigationTarget) -> Result<()>;

    /// Change the displayed time range. Panels refresh asynchronously.
    fn set_time_range(&self, _range: &TimeRange) -> Result<()> {
        Err(ReadyError::Host(
            "time range mutation not supported by this host".to_owned(),
        ))
    }
}

impl<H: DashboardHost> DashboardHost for Arc<H> {
    fn active_dashboard(&self) -> Option<DashboardSnapshot> {
        (**self).active_dashboard()
    }

    fn navigate(&self, target: &NavigationTarget) -> Result<()> {
        (**self).navigate(target)
    }

    fn set_time_range(&self, range: &TimeRange) -> Result<()> {
        (**self).set_time_range(range)
    }
}
