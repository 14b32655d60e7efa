//! Data model shared by the readiness components and host adapters.

use crate::error::ReadyError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

/// Panel identifier as reported by the host: numeric on most dashboards,
/// string on some plugin panels.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PanelId {
    Num(i64),
    Name(String),
}

impl PanelId {
    /// Canonical textual key. `3` and `"3"` share the key `"3"`.
    #[must_use]
    pub fn canonical(&self) -> String {
        match self {
            Self::Num(n) => n.to_string(),
            Self::Name(s) => s.trim().to_owned(),
        }
    }

    /// Loose equality: a numeric id matches its decimal string form.
    #[must_use]
    pub fn matches(&self, other: &PanelId) -> bool {
        self == other || self.canonical() == other.canonical()
    }
}

impl fmt::Display for PanelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Num(n) => write!(f, "{n}"),
            Self::Name(s) => f.write_str(s),
        }
    }
}

impl From<i64> for PanelId {
    fn from(value: i64) -> Self {
        Self::Num(value)
    }
}

impl From<i32> for PanelId {
    fn from(value: i32) -> Self {
        Self::Num(i64::from(value))
    }
}

impl From<&str> for PanelId {
    fn from(value: &str) -> Self {
        Self::Name(value.to_owned())
    }
}

/// How the dashboard should be presented once navigated to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewMode {
    /// Regular dashboard route (`/d/...`).
    #[default]
    Default,
    /// Alternate route segment taken from `dashboard-view` (e.g. `d-solo`).
    View,
    /// Regular route with a single panel shown fullscreen.
    FocusedPanel,
}

/// Time range in the host's own notation (`now-6h`, epoch millis, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub from: String,
    pub to: String,
}

impl TimeRange {
    #[must_use]
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Build a range from absolute timestamps, rendered as epoch milliseconds.
    #[must_use]
    pub fn from_datetimes(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            from: from.timestamp_millis().to_string(),
            to: to.timestamp_millis().to_string(),
        }
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.from, self.to)
    }
}

/// A request to show a dashboard. Immutable once issued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardRequest {
    pub identifier: String,
    #[serde(default)]
    pub view_mode: ViewMode,
    #[serde(default)]
    pub focused_panel_id: Option<PanelId>,
    #[serde(default)]
    pub time_range: Option<TimeRange>,
}

impl DashboardRequest {
    #[must_use]
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            view_mode: ViewMode::Default,
            focused_panel_id: None,
            time_range: None,
        }
    }

    #[must_use]
    pub fn with_view_mode(mut self, view_mode: ViewMode) -> Self {
        self.view_mode = view_mode;
        self
    }

    /// Focus a single panel. Switches the view mode to [`ViewMode::FocusedPanel`].
    #[must_use]
    pub fn with_focused_panel(mut self, panel_id: impl Into<PanelId>) -> Self {
        self.focused_panel_id = Some(panel_id.into());
        self.view_mode = ViewMode::FocusedPanel;
        self
    }

    #[must_use]
    pub fn with_time_range(mut self, range: TimeRange) -> Self {
        self.time_range = Some(range);
        self
    }
}

/// Identity and type of a panel at resolution time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanelDescriptor {
    pub id: PanelId,
    #[serde(rename = "type", alias = "kind")]
    pub kind: String,
}

impl PanelDescriptor {
    #[must_use]
    pub fn new(id: impl Into<PanelId>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
        }
    }
}

/// Which panels take part in a readiness cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanelFilterConfig {
    #[serde(default)]
    pub focused_panel_id: Option<PanelId>,
    #[serde(default)]
    pub excluded_kinds: BTreeSet<String>,
}

impl PanelFilterConfig {
    #[must_use]
    pub fn excluding<I, S>(kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            focused_panel_id: None,
            excluded_kinds: kinds.into_iter().map(Into::into).collect(),
        }
    }

    #[must_use]
    pub fn with_focused_panel(mut self, panel_id: impl Into<PanelId>) -> Self {
        self.focused_panel_id = Some(panel_id.into());
        self
    }

    #[must_use]
    pub fn is_excluded(&self, kind: &str) -> bool {
        self.excluded_kinds.contains(kind)
    }
}

/// What the host currently displays. Produced by host adapters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardSnapshot {
    pub uid: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub folder_title: Option<String>,
    #[serde(default)]
    pub panels: Vec<PanelDescriptor>,
}

impl DashboardSnapshot {
    #[must_use]
    pub fn new(uid: impl Into<String>, panels: Vec<PanelDescriptor>) -> Self {
        Self {
            uid: uid.into(),
            title: String::new(),
            folder_title: None,
            panels,
        }
    }
}

/// Identifies one readiness cycle. Strictly increasing per gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CycleToken(pub u64);

impl CycleToken {
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl fmt::Display for CycleToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The dashboard a cycle found active. Valid for that cycle only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveDashboard {
    cycle: CycleToken,
    snapshot: DashboardSnapshot,
}

impl ActiveDashboard {
    pub(crate) fn acquire(cycle: CycleToken, snapshot: DashboardSnapshot) -> Self {
        Self { cycle, snapshot }
    }

    #[must_use]
    pub fn cycle(&self) -> CycleToken {
        self.cycle
    }

    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.snapshot.uid
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.snapshot.title
    }

    #[must_use]
    pub fn panels(&self) -> &[PanelDescriptor] {
        &self.snapshot.panels
    }

    /// Title as shown in the header: `Folder / Title`, or just the title
    /// when `no_folder` is set or the dashboard has no folder.
    #[must_use]
    pub fn display_title(&self, no_folder: bool) -> String {
        match (&self.snapshot.folder_title, no_folder) {
            (Some(folder), false) if !folder.is_empty() => {
                format!("{folder} / {}", self.snapshot.title)
            }
            _ => self.snapshot.title.clone(),
        }
    }
}

/// Which wait ran out of time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum TimeoutStage {
    Dashboard { identifier: String },
    Panels { outstanding: Vec<PanelId> },
}

/// Terminal result of one readiness cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessOutcome {
    Ready(ActiveDashboard),
    PanelFailed { panel_id: PanelId, cause: String },
    TimedOut { elapsed: Duration, stage: TimeoutStage },
    Cancelled { elapsed: Duration },
}

impl ReadinessOutcome {
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    /// Short label used in status snapshots and bridge events.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Ready(_) => "ready",
            Self::PanelFailed { .. } => "panel_failed",
            Self::TimedOut { .. } => "timed_out",
            Self::Cancelled { .. } => "cancelled",
        }
    }

    /// Convert into a `Result` for callers that propagate with `?`.
    ///
    /// `identifier` fills in the dashboard name for panel-stage timeouts,
    /// which the outcome itself does not carry.
    pub fn into_result(self, identifier: &str) -> crate::Result<ActiveDashboard> {
        match self {
            Self::Ready(dashboard) => Ok(dashboard),
            Self::PanelFailed { panel_id, cause } => {
                Err(ReadyError::PanelDataError { panel_id, cause })
            }
            Self::TimedOut {
                elapsed,
                stage: TimeoutStage::Dashboard { identifier },
            } => Err(ReadyError::DashboardTimeout {
                identifier,
                elapsed_ms: millis(elapsed),
            }),
            Self::TimedOut {
                elapsed,
                stage: TimeoutStage::Panels { outstanding },
            } => Err(ReadyError::ReadinessTimeout {
                identifier: identifier.to_owned(),
                outstanding,
                elapsed_ms: millis(elapsed),
            }),
            Self::Cancelled { elapsed } => Err(ReadyError::Cancelled {
                elapsed_ms: millis(elapsed),
            }),
        }
    }
}

/// Saturating millisecond count for logging and wire payloads.
#[must_use]
pub fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
