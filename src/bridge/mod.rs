//! JSON-lines bridge between a capture driver, a shim inside the dashboard
//! host, and a [`ReadinessGate`](crate::readiness::ReadinessGate).

pub mod channel;
pub mod contract;
pub mod host;
pub mod stdio;

pub use channel::{BridgeClient, BridgeServer, bridge_channel};
pub use contract::{CommandEnvelope, CommandName, EventEnvelope, ResponseEnvelope};
pub use host::BridgeHost;
pub use stdio::{run_bridge, run_stdio_bridge};
