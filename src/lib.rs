//! dashready: readiness detection for dashboard frame capture.
//!
//! A capture driver asks for a dashboard and gets back one outcome once the
//! host has shown it and every visible data panel has finished loading:
//! request → dashboard active → all panels reported.
//!
//! # Architecture
//!
//! - **Navigation**: computes the host route and asks the host to go there
//! - **Waiter**: polls the host until the requested dashboard is active
//! - **Resolver**: picks the panels expected to report data
//! - **Aggregator**: collects per-panel signals into a single outcome
//! - **Gate**: runs the above as one cycle under a deadline, with
//!   cancellation and a status channel
//!
//! Hosts are reached through [`host::DashboardHost`]; [`bridge`] provides a
//! JSON-lines adapter for a shim running inside the host.

pub mod bridge;
pub mod config;
pub mod deadline;
pub mod error;
pub mod host;
pub mod model;
pub mod readiness;

pub use config::ReadyConfig;
pub use error::{ReadyError, Result};
pub use host::signals::{PanelSignal, SignalHub, SignalKind};
pub use host::{DashboardHost, NavigationTarget};
pub use model::{
    ActiveDashboard, CycleToken, DashboardRequest, DashboardSnapshot, PanelDescriptor,
    PanelFilterConfig, PanelId, ReadinessOutcome, TimeRange, TimeoutStage, ViewMode,
};
pub use readiness::{CycleCanceller, CycleState, ReadinessGate, StatusHandle};
