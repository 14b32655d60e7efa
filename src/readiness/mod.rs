//! Readiness state machine: navigate, wait for the dashboard, resolve the
//! expected panels, then aggregate their completion signals.

pub mod aggregator;
pub mod cycle;
pub mod gate;
pub mod navigation;
pub mod resolver;
pub mod status;
pub mod waiter;

pub use aggregator::{PanelTally, ReadinessAggregator, SignalInbox};
pub use cycle::{CycleContext, CycleCounters, CycleState};
pub use gate::ReadinessGate;
pub use resolver::{PanelSet, SkipReason, resolve_panels};
pub use status::{CycleCanceller, CycleReport, CycleStatus, GateStats, StatusHandle};
pub use waiter::{WaitAbort, wait_for_dashboard};
