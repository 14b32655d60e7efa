//! Navigation requests.
//!
//! Navigation is fire-and-forget: failures are logged and surface later as
//! a dashboard timeout, because completion is only ever observed by polling.

use crate::config::ViewOptions;
use crate::host::{DashboardHost, NavigationTarget};
use crate::model::{DashboardRequest, PanelId, ViewMode};
use tracing::{debug, warn};

/// Slug segment of the dashboard route. The host resolves dashboards by uid
/// and ignores the slug.
const ROUTE_SLUG: &str = "dashboard";

/// Compute the route for `request`, focusing `focus` when set.
///
/// `focus` is the focused panel of the filter the cycle resolves panels
/// with, so the route and the expected panel set always agree.
#[must_use]
pub fn target_for(
    request: &DashboardRequest,
    focus: Option<&PanelId>,
    view: &ViewOptions,
) -> NavigationTarget {
    let segment = match request.view_mode {
        ViewMode::View => view.view_segment(),
        ViewMode::Default | ViewMode::FocusedPanel => "d",
    };
    let mut target = NavigationTarget::new(format!(
        "/{segment}/{}/{ROUTE_SLUG}",
        urlencoding::encode(&request.identifier)
    ));

    if let Some(panel_id) = focus {
        target = target.param("panelId", panel_id.to_string());
        if request.view_mode != ViewMode::View {
            target = target.flag("fullscreen");
        }
    }

    if let Some(range) = &request.time_range {
        target = target.param("from", &range.from).param("to", &range.to);
    }
    target
}

/// Instruct the host to show `request`. Never fails.
pub fn request<H: DashboardHost + ?Sized>(
    host: &H,
    request: &DashboardRequest,
    focus: Option<&PanelId>,
    view: &ViewOptions,
) {
    let target = target_for(request, focus, view);
    debug!(
        identifier = %request.identifier,
        target = %target.relative(),
        "requesting dashboard navigation"
    );

    if let Err(e) = host.navigate(&target) {
        warn!(
            identifier = %request.identifier,
            error = %e,
            "navigation unavailable; cycle will time out unless the dashboard appears anyway"
        );
    }

    if let Some(range) = &request.time_range
        && let Err(e) = host.set_time_range(range)
    {
        warn!(
            identifier = %request.identifier,
            range = %range,
            error = %e,
            "failed to push time range to host"
        );
    }
}
