//! Versioned command/event envelopes for the driver and host-shim bridge.

use crate::model::{
    DashboardRequest, PanelId, ReadinessOutcome, TimeRange, TimeoutStage, millis,
};
use serde::{Deserialize, Serialize};

/// Contract version for bridge command/event envelopes.
pub const EVENT_VERSION: u32 = 1;

/// Channel name reported by `host.version`.
pub const CHANNEL_NAME: &str = "dashready_bridge_v1";

/// Host shim should navigate. Payload: [`NavigateEvent`].
pub const EVENT_NAVIGATE: &str = "host.navigate";
/// Host shim should change the time range. Payload: [`TimeRange`].
pub const EVENT_SET_TIME_RANGE: &str = "host.set_time_range";
/// A readiness cycle settled. Payload: [`SettledEvent`].
pub const EVENT_CYCLE_SETTLED: &str = "cycle.settled";

/// Bridge command set.
///
/// `dashboard.*`, `time.*` and `cycle.*` come from the driver; `host.*`
/// notifications come from the shim running inside the dashboard host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandName {
    #[serde(rename = "host.ping")]
    HostPing,
    #[serde(rename = "host.version")]
    HostVersion,
    #[serde(rename = "dashboard.open")]
    DashboardOpen,
    #[serde(rename = "time.advance")]
    TimeAdvance,
    #[serde(rename = "cycle.status")]
    CycleStatus,
    #[serde(rename = "cycle.cancel")]
    CycleCancel,
    #[serde(rename = "host.dashboard_active")]
    HostDashboardActive,
    #[serde(rename = "host.dashboard_cleared")]
    HostDashboardCleared,
    #[serde(rename = "host.panel_signal")]
    HostPanelSignal,
    #[serde(rename = "bridge.stop")]
    BridgeStop,
}

impl CommandName {
    /// Render command name to wire format.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HostPing => "host.ping",
            Self::HostVersion => "host.version",
            Self::DashboardOpen => "dashboard.open",
            Self::TimeAdvance => "time.advance",
            Self::CycleStatus => "cycle.status",
            Self::CycleCancel => "cycle.cancel",
            Self::HostDashboardActive => "host.dashboard_active",
            Self::HostDashboardCleared => "host.dashboard_cleared",
            Self::HostPanelSignal => "host.panel_signal",
            Self::BridgeStop => "bridge.stop",
        }
    }

    /// Parse a command name from wire format.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "host.ping" => Some(Self::HostPing),
            "host.version" => Some(Self::HostVersion),
            "dashboard.open" => Some(Self::DashboardOpen),
            "time.advance" => Some(Self::TimeAdvance),
            "cycle.status" => Some(Self::CycleStatus),
            "cycle.cancel" => Some(Self::CycleCancel),
            "host.dashboard_active" => Some(Self::HostDashboardActive),
            "host.dashboard_cleared" => Some(Self::HostDashboardCleared),
            "host.panel_signal" => Some(Self::HostPanelSignal),
            "bridge.stop" => Some(Self::BridgeStop),
            _ => None,
        }
    }
}

/// A versioned response envelope, bridge -> caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub v: u32,
    pub request_id: String,
    pub ok: bool,
    pub payload: serde_json::Value,
    pub error: Option<String>,
}

impl ResponseEnvelope {
    #[must_use]
    pub fn ok(request_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            v: EVENT_VERSION,
            request_id: request_id.into(),
            ok: true,
            payload,
            error: None,
        }
    }

    #[must_use]
    pub fn error(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            v: EVENT_VERSION,
            request_id: request_id.into(),
            ok: false,
            payload: serde_json::Value::Null,
            error: Some(message.into()),
        }
    }
}

/// A versioned command envelope, caller -> bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub v: u32,
    pub request_id: String,
    pub command: CommandName,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl CommandEnvelope {
    #[must_use]
    pub fn new(
        request_id: impl Into<String>,
        command: CommandName,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            v: EVENT_VERSION,
            request_id: request_id.into(),
            command,
            payload,
        }
    }

    /// Validate envelope version and required identifiers.
    pub fn validate(&self) -> Result<(), ContractError> {
        if self.v != EVENT_VERSION {
            return Err(ContractError::new(
                ContractErrorKind::UnsupportedVersion,
                format!(
                    "unsupported contract version {}; expected {}",
                    self.v, EVENT_VERSION
                ),
            ));
        }
        if self.request_id.trim().is_empty() {
            return Err(ContractError::new(
                ContractErrorKind::InvalidEnvelope,
                "request_id cannot be empty".to_owned(),
            ));
        }
        Ok(())
    }

    /// Decode the payload into a typed command body.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, ContractError> {
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            ContractError::new(
                ContractErrorKind::InvalidPayload,
                format!("{}: {e}", self.command.as_str()),
            )
        })
    }
}

/// A versioned event envelope, bridge -> subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub v: u32,
    pub event_id: String,
    pub event: String,
    pub payload: serde_json::Value,
}

impl EventEnvelope {
    #[must_use]
    pub fn new(
        event_id: impl Into<String>,
        event: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            v: EVENT_VERSION,
            event_id: event_id.into(),
            event: event.into(),
            payload,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractErrorKind {
    UnsupportedVersion,
    InvalidEnvelope,
    InvalidPayload,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct ContractError {
    pub kind: ContractErrorKind,
    pub message: String,
}

impl ContractError {
    #[must_use]
    pub fn new(kind: ContractErrorKind, message: String) -> Self {
        Self { kind, message }
    }
}

impl From<ContractError> for crate::error::ReadyError {
    fn from(err: ContractError) -> Self {
        Self::Contract(err.to_string())
    }
}

/// `dashboard.open` payload: a [`DashboardRequest`] plus an optional
/// deadline override.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenCommand {
    #[serde(flatten)]
    pub request: DashboardRequest,
    #[serde(default)]
    pub deadline_ms: Option<u64>,
}

/// `time.advance` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvanceCommand {
    #[serde(flatten)]
    pub range: TimeRange,
    #[serde(default)]
    pub deadline_ms: Option<u64>,
}

/// `host.navigate` event payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigateEvent {
    /// Host-relative route including the query string.
    pub path: String,
    /// Absolute URL, when the bridge knows the host base URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// `cycle.settled` event payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettledEvent {
    /// `request_id` of the command that started the cycle.
    pub request_id: String,
    pub identifier: String,
    /// `ready`, `panel_failed`, `timed_out`, `cancelled`, or `error`.
    pub outcome: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cycle: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub panel_id: Option<PanelId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<TimeoutStage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SettledEvent {
    /// Describe `outcome` for the driver. `no_folder` follows the
    /// `header-layout` option.
    #[must_use]
    pub fn from_outcome(
        request_id: &str,
        identifier: &str,
        outcome: &ReadinessOutcome,
        no_folder: bool,
    ) -> Self {
        let mut event = Self::bare(request_id, identifier, outcome.label());
        match outcome {
            ReadinessOutcome::Ready(dashboard) => {
                event.cycle = Some(dashboard.cycle().0);
                event.title = Some(dashboard.display_title(no_folder));
            }
            ReadinessOutcome::PanelFailed { panel_id, cause } => {
                event.panel_id = Some(panel_id.clone());
                event.cause = Some(cause.clone());
            }
            ReadinessOutcome::TimedOut { elapsed, stage } => {
                event.elapsed_ms = Some(millis(*elapsed));
                event.stage = Some(stage.clone());
            }
            ReadinessOutcome::Cancelled { elapsed } => {
                event.elapsed_ms = Some(millis(*elapsed));
            }
        }
        event
    }

    /// A cycle that could not start.
    #[must_use]
    pub fn failed_to_start(request_id: &str, identifier: &str, error: &crate::ReadyError) -> Self {
        let mut event = Self::bare(request_id, identifier, "error");
        event.error = Some(error.to_string());
        event
    }

    fn bare(request_id: &str, identifier: &str, outcome: &str) -> Self {
        Self {
            request_id: request_id.to_owned(),
            identifier: identifier.to_owned(),
            outcome: outcome.to_owned(),
            cycle: None,
            elapsed_ms: None,
            title: None,
            panel_id: None,
            cause: None,
            stage: None,
            error: None,
        }
    }
}
