//! Error types for dashboard readiness cycles.

use crate::model::PanelId;

/// Top-level error type for readiness detection.
#[derive(Debug, thiserror::Error)]
pub enum ReadyError {
    /// The host's navigation primitive is missing or rejected the request.
    #[error("navigation unavailable: {0}")]
    NavigationUnavailable(String),

    /// The requested dashboard never became active within budget.
    #[error("dashboard {identifier} not active after {elapsed_ms} ms")]
    DashboardTimeout { identifier: String, elapsed_ms: u64 },

    /// A panel reported a data error.
    #[error("panel {panel_id} reported a data error: {cause}")]
    PanelDataError { panel_id: PanelId, cause: String },

    /// Panels did not all complete within budget.
    #[error(
        "dashboard {identifier}: {} panel(s) outstanding after {elapsed_ms} ms: {}",
        outstanding.len(),
        format_panel_ids(outstanding)
    )]
    ReadinessTimeout {
        identifier: String,
        outstanding: Vec<PanelId>,
        elapsed_ms: u64,
    },

    /// The cycle was cancelled before it settled.
    #[error("readiness cycle cancelled after {elapsed_ms} ms")]
    Cancelled { elapsed_ms: u64 },

    /// Another readiness cycle is still in flight.
    #[error("readiness cycle {0} still in flight")]
    CycleInFlight(u64),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Host adapter error.
    #[error("host error: {0}")]
    Host(String),

    /// Bridge contract violation (bad envelope, bad payload).
    #[error("contract error: {0}")]
    Contract(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),
}

pub(crate) fn format_panel_ids(ids: &[PanelId]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, ReadyError>;
