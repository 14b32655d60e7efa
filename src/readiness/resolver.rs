//! Decide which panels of a dashboard must report before it counts as ready.

use crate::model::{ActiveDashboard, PanelDescriptor, PanelFilterConfig, PanelId};
use serde::Serialize;
use tracing::{debug, warn};

/// Why a panel was left out of the expected set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Another panel is focused.
    NotFocused,
    /// The panel kind is in `excluded_kinds`.
    ExcludedKind,
}

/// Result of panel resolution: expected panels in display order, plus the
/// skipped ones for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PanelSet {
    expected: Vec<PanelDescriptor>,
    skipped: Vec<(PanelDescriptor, SkipReason)>,
    missing_focus: Option<PanelId>,
}

impl PanelSet {
    #[must_use]
    pub fn expected(&self) -> &[PanelDescriptor] {
        &self.expected
    }

    #[must_use]
    pub fn skipped(&self) -> &[(PanelDescriptor, SkipReason)] {
        &self.skipped
    }

    /// The focused panel id that matched nothing, if any.
    #[must_use]
    pub fn missing_focus(&self) -> Option<&PanelId> {
        self.missing_focus.as_ref()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.expected.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.expected.is_empty()
    }

    /// Build a set directly from expected panels.
    #[must_use]
    pub fn of(expected: Vec<PanelDescriptor>) -> Self {
        Self {
            expected,
            ..Self::default()
        }
    }
}

/// Resolve the expected panel set for `dashboard` under `filter`.
///
/// A focused panel is taken regardless of its kind. A focused id that
/// matches nothing yields an empty set and a warning.
#[must_use]
pub fn resolve_panels(dashboard: &ActiveDashboard, filter: &PanelFilterConfig) -> PanelSet {
    let mut set = PanelSet::default();

    for panel in dashboard.panels() {
        let reason = match &filter.focused_panel_id {
            Some(focused) if !panel.id.matches(focused) => Some(SkipReason::NotFocused),
            Some(_) => None,
            None if filter.is_excluded(&panel.kind) => Some(SkipReason::ExcludedKind),
            None => None,
        };
        match reason {
            Some(reason) => set.skipped.push((panel.clone(), reason)),
            None => set.expected.push(panel.clone()),
        }
    }

    if let Some(focused) = &filter.focused_panel_id
        && set.expected.is_empty()
    {
        warn!(
            identifier = dashboard.identifier(),
            panel_id = %focused,
            "focused panel not found on dashboard; readiness will be vacuous"
        );
        set.missing_focus = Some(focused.clone());
    }

    debug!(
        identifier = dashboard.identifier(),
        expected = set.expected.len(),
        skipped = set.skipped.len(),
        "resolved panel set"
    );
    set
}
