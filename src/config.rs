//! Configuration types for readiness detection.

use crate::model::{PanelFilterConfig, PanelId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadyConfig {
    /// Poll interval and deadlines.
    pub timing: TimingConfig,
    /// Which panel kinds never take part in readiness.
    pub panels: PanelsConfig,
    /// Options passed through from the driver (`panel-id`, `dashboard-view`, ...).
    pub view: ViewOptions,
    /// JSON-lines bridge channel sizing.
    pub bridge: BridgeConfig,
}

/// Timing configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// How often the waiter inspects the active dashboard, in ms.
    pub poll_interval_ms: u64,
    /// Budget for the dashboard to become active, in ms.
    ///
    /// Capped by `total_deadline_ms` at run time.
    pub dashboard_deadline_ms: u64,
    /// Budget for a whole cycle (dashboard plus panels), in ms.
    pub total_deadline_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            dashboard_deadline_ms: 10_000,
            total_deadline_ms: 20_000,
        }
    }
}

impl TimingConfig {
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub fn dashboard_deadline(&self) -> Duration {
        Duration::from_millis(self.dashboard_deadline_ms)
    }

    #[must_use]
    pub fn total_deadline(&self) -> Duration {
        Duration::from_millis(self.total_deadline_ms)
    }
}

/// Panel filtering configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PanelsConfig {
    /// Panel kinds that never emit a completion signal.
    pub excluded_kinds: BTreeSet<String>,
}

impl Default for PanelsConfig {
    fn default() -> Self {
        Self {
            excluded_kinds: ["row", "text"].into_iter().map(str::to_owned).collect(),
        }
    }
}

/// Driver-facing view options. Field names follow the driver's dashed
/// option names.
///
/// `header-layout` and `datetime-format` belong to the cosmetic layer and
/// are only passed through.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ViewOptions {
    pub header_layout: BTreeSet<String>,
    pub panel_id: Option<PanelId>,
    pub dashboard_view: Option<String>,
    pub datetime_format: Option<String>,
}

impl ViewOptions {
    /// Route segment used for [`crate::model::ViewMode::View`].
    pub const DEFAULT_VIEW_SEGMENT: &'static str = "d-solo";

    /// Whether any of `layouts` is present in `header-layout`.
    #[must_use]
    pub fn has_header_layout(&self, layouts: &[&str]) -> bool {
        layouts
            .iter()
            .any(|layout| self.header_layout.contains(*layout))
    }

    #[must_use]
    pub fn view_segment(&self) -> &str {
        self.dashboard_view
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(Self::DEFAULT_VIEW_SEGMENT)
    }
}

/// Bridge channel sizing and host location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub request_capacity: usize,
    pub event_capacity: usize,
    /// Host base URL. When set, `host.navigate` events carry absolute URLs.
    pub base_url: Option<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            request_capacity: 64,
            event_capacity: 128,
            base_url: None,
        }
    }
}

impl BridgeConfig {
    /// Parsed `base_url`.
    pub fn base_url(&self) -> crate::error::Result<Option<Url>> {
        self.base_url
            .as_deref()
            .map(|raw| {
                Url::parse(raw).map_err(|e| {
                    crate::error::ReadyError::Config(format!("bridge.base_url `{raw}`: {e}"))
                })
            })
            .transpose()
    }
}

impl ReadyConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or fails validation.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&content).map_err(|e| crate::error::ReadyError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::ReadyError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `~/.config/dashready/config.toml`.
    pub fn default_config_path() -> PathBuf {
        if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
            PathBuf::from(config).join("dashready").join("config.toml")
        } else if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home)
                .join(".config")
                .join("dashready")
                .join("config.toml")
        } else {
            PathBuf::from("/tmp/dashready-config/config.toml")
        }
    }

    /// Reject settings that would make every cycle time out or spin.
    pub fn validate(&self) -> crate::error::Result<()> {
        let timing = &self.timing;
        if timing.poll_interval_ms == 0 {
            return Err(crate::error::ReadyError::Config(
                "timing.poll_interval_ms must be greater than zero".to_owned(),
            ));
        }
        if timing.dashboard_deadline_ms == 0 || timing.total_deadline_ms == 0 {
            return Err(crate::error::ReadyError::Config(
                "timing deadlines must be greater than zero".to_owned(),
            ));
        }
        self.bridge.base_url()?;
        Ok(())
    }

    /// Panel filter for a cycle: configured exclusions plus the `panel-id` option.
    #[must_use]
    pub fn panel_filter(&self) -> PanelFilterConfig {
        PanelFilterConfig {
            focused_panel_id: self.view.panel_id.clone(),
            excluded_kinds: self.panels.excluded_kinds.clone(),
        }
    }
}
