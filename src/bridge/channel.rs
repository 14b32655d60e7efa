//! Bridge command channel and router.
//!
//! The router owns the [`ReadinessGate`]. Cycle commands run on spawned
//! tasks and report through `cycle.settled` events; shim notifications are
//! applied synchronously.

use crate::bridge::contract::{
    AdvanceCommand, CHANNEL_NAME, CommandEnvelope, CommandName, EVENT_CYCLE_SETTLED,
    EVENT_VERSION, EventEnvelope, OpenCommand, ResponseEnvelope, SettledEvent,
};
use crate::bridge::host::BridgeHost;
use crate::config::ReadyConfig;
use crate::error::{ReadyError, Result};
use crate::host::signals::{PanelSignal, SignalHub};
use crate::model::DashboardSnapshot;
use crate::readiness::{CycleCanceller, ReadinessGate, StatusHandle};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard, broadcast, mpsc, oneshot};
use tracing::{debug, warn};

struct BridgeRequest {
    envelope: CommandEnvelope,
    response_tx: oneshot::Sender<ResponseEnvelope>,
}

#[derive(Clone)]
pub struct BridgeClient {
    request_tx: mpsc::Sender<BridgeRequest>,
    event_tx: broadcast::Sender<EventEnvelope>,
}

impl BridgeClient {
    /// Dispatch one command and wait for its response.
    ///
    /// Command failures come back as `ok: false` responses; `Err` means the
    /// envelope was invalid or the server is gone.
    pub async fn send(&self, envelope: CommandEnvelope) -> Result<ResponseEnvelope> {
        envelope.validate()?;

        let (response_tx, response_rx) = oneshot::channel();
        self.request_tx
            .send(BridgeRequest {
                envelope,
                response_tx,
            })
            .await
            .map_err(|e| ReadyError::Channel(format!("failed to send bridge request: {e}")))?;

        response_rx
            .await
            .map_err(|e| ReadyError::Channel(format!("bridge response dropped: {e}")))
    }

    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<EventEnvelope> {
        self.event_tx.subscribe()
    }
}

pub struct BridgeServer {
    request_rx: mpsc::Receiver<BridgeRequest>,
    event_tx: broadcast::Sender<EventEnvelope>,
    host: BridgeHost,
    hub: SignalHub,
    gate: Arc<Mutex<ReadinessGate<BridgeHost>>>,
    status: StatusHandle,
    canceller: CycleCanceller,
    config: ReadyConfig,
}

/// Build a connected client/server pair around a fresh gate.
///
/// # Errors
///
/// Fails if `config.bridge.base_url` does not parse.
pub fn bridge_channel(config: ReadyConfig) -> Result<(BridgeClient, BridgeServer)> {
    let (event_tx, _event_rx) = broadcast::channel(config.bridge.event_capacity.max(1));
    let (request_tx, request_rx) = mpsc::channel(config.bridge.request_capacity.max(1));

    let mut host = BridgeHost::new(event_tx.clone());
    if let Some(base_url) = config.bridge.base_url()? {
        host = host.with_base_url(base_url);
    }
    let hub = SignalHub::new();
    let gate = ReadinessGate::new(host.clone(), hub.clone(), config.clone());
    let status = gate.status_handle();
    let canceller = gate.canceller();

    Ok((
        BridgeClient {
            request_tx,
            event_tx: event_tx.clone(),
        },
        BridgeServer {
            request_rx,
            event_tx,
            host,
            hub,
            gate: Arc::new(Mutex::new(gate)),
            status,
            canceller,
            config,
        },
    ))
}

impl BridgeServer {
    pub async fn run(mut self) {
        while let Some(request) = self.request_rx.recv().await {
            let envelope = &request.envelope;
            let response = self.route(envelope).unwrap_or_else(|e| {
                warn!(
                    command = envelope.command.as_str(),
                    request_id = %envelope.request_id,
                    error = %e,
                    "bridge command failed"
                );
                ResponseEnvelope::error(envelope.request_id.clone(), e.to_string())
            });
            let _ = request.response_tx.send(response);
        }
        debug!("bridge request channel closed; router exiting");
    }

    #[must_use]
    pub fn host(&self) -> &BridgeHost {
        &self.host
    }

    #[must_use]
    pub fn hub(&self) -> &SignalHub {
        &self.hub
    }

    #[must_use]
    pub fn status_handle(&self) -> StatusHandle {
        self.status.clone()
    }

    /// Route a command envelope to its handler.
    pub fn route(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        match envelope.command {
            CommandName::HostPing => Ok(ResponseEnvelope::ok(
                envelope.request_id.clone(),
                serde_json::json!({"pong": true}),
            )),
            CommandName::HostVersion => Ok(ResponseEnvelope::ok(
                envelope.request_id.clone(),
                serde_json::json!({
                    "contract_version": EVENT_VERSION,
                    "channel": CHANNEL_NAME,
                    "version": env!("CARGO_PKG_VERSION"),
                }),
            )),
            CommandName::DashboardOpen => self.handle_dashboard_open(envelope),
            CommandName::TimeAdvance => self.handle_time_advance(envelope),
            CommandName::CycleStatus => self.handle_cycle_status(envelope),
            CommandName::CycleCancel => Ok(ResponseEnvelope::ok(
                envelope.request_id.clone(),
                serde_json::json!({"cancelled": self.canceller.cancel()}),
            )),
            CommandName::HostDashboardActive => self.handle_dashboard_active(envelope),
            CommandName::HostDashboardCleared => {
                self.host.clear_active();
                Ok(ResponseEnvelope::ok(
                    envelope.request_id.clone(),
                    serde_json::json!({"accepted": true}),
                ))
            }
            CommandName::HostPanelSignal => self.handle_panel_signal(envelope),
            CommandName::BridgeStop => Ok(ResponseEnvelope::ok(
                envelope.request_id.clone(),
                serde_json::json!({"stopping": true}),
            )),
        }
    }

    fn handle_dashboard_open(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        let OpenCommand {
            request,
            deadline_ms,
        } = envelope.decode()?;
        let mut gate = self.acquire_gate()?;

        let filter = gate.filter_for(&request);
        let deadline = self.deadline_or_default(deadline_ms);
        let request_id = envelope.request_id.clone();
        let identifier = request.identifier.clone();
        let event_tx = self.event_tx.clone();
        let no_folder = self.no_folder();

        tokio::spawn(async move {
            let outcome = gate
                .open_and_await_ready(&request, &filter, deadline)
                .await;
            let settled =
                SettledEvent::from_outcome(&request_id, &request.identifier, &outcome, no_folder);
            emit_event(&event_tx, EVENT_CYCLE_SETTLED, &settled);
        });

        Ok(ResponseEnvelope::ok(
            envelope.request_id.clone(),
            serde_json::json!({"accepted": true, "identifier": identifier}),
        ))
    }

    fn handle_time_advance(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        let AdvanceCommand { range, deadline_ms } = envelope.decode()?;
        let mut gate = self.acquire_gate()?;

        let Some(identifier) = gate.last_identifier().map(str::to_owned) else {
            return Err(ReadyError::Config(
                "time.advance requires a prior dashboard.open".to_owned(),
            ));
        };
        let filter = gate
            .last_filter()
            .cloned()
            .unwrap_or_else(|| self.config.panel_filter());
        let deadline = self.deadline_or_default(deadline_ms);
        let request_id = envelope.request_id.clone();
        let event_tx = self.event_tx.clone();
        let no_folder = self.no_folder();
        let accepted = serde_json::json!({
            "accepted": true,
            "identifier": identifier,
            "from": range.from,
            "to": range.to,
        });

        tokio::spawn(async move {
            let settled = match gate.advance_time(&range, &filter, deadline).await {
                Ok(outcome) => {
                    SettledEvent::from_outcome(&request_id, &identifier, &outcome, no_folder)
                }
                Err(e) => {
                    warn!(identifier = %identifier, error = %e, "time advance failed to start");
                    SettledEvent::failed_to_start(&request_id, &identifier, &e)
                }
            };
            emit_event(&event_tx, EVENT_CYCLE_SETTLED, &settled);
        });

        Ok(ResponseEnvelope::ok(envelope.request_id.clone(), accepted))
    }

    fn handle_cycle_status(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        let status = self.status.snapshot();
        let mut payload = serde_json::json!({
            "ready": self.status.is_ready(),
            "status": to_payload(&status)?,
        });
        // Stats live behind the gate lock; skip them while a cycle runs.
        if let Ok(gate) = self.gate.try_lock() {
            payload["stats"] = to_payload(&gate.stats())?;
            payload["last_report"] = to_payload(&gate.last_report())?;
        }
        payload["hub"] = to_payload(&self.hub.stats())?;
        Ok(ResponseEnvelope::ok(envelope.request_id.clone(), payload))
    }

    fn handle_dashboard_active(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        let snapshot: DashboardSnapshot = envelope.decode()?;
        if snapshot.uid.trim().is_empty() {
            return Err(ReadyError::Contract(
                "host.dashboard_active requires a non-empty payload.uid".to_owned(),
            ));
        }
        let payload = serde_json::json!({
            "accepted": true,
            "uid": snapshot.uid,
            "panels": snapshot.panels.len(),
        });
        if self.host.set_active(snapshot) {
            let dropped = self.hub.discard_held();
            if dropped > 0 {
                debug!(dropped, "dropped panel signals published before dashboard activation");
            }
        }
        Ok(ResponseEnvelope::ok(envelope.request_id.clone(), payload))
    }

    fn handle_panel_signal(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        let signal: PanelSignal = envelope.decode()?;
        let panel_id = signal.panel_id.to_string();
        let delivered = self.hub.publish(signal);
        Ok(ResponseEnvelope::ok(
            envelope.request_id.clone(),
            serde_json::json!({
                "accepted": true,
                "panel_id": panel_id,
                "delivered": delivered,
            }),
        ))
    }

    fn acquire_gate(&self) -> Result<OwnedMutexGuard<ReadinessGate<BridgeHost>>> {
        Arc::clone(&self.gate).try_lock_owned().map_err(|_| {
            let cycle = self.status.snapshot().cycle.map_or(0, |token| token.0);
            ReadyError::CycleInFlight(cycle)
        })
    }

    fn deadline_or_default(&self, deadline_ms: Option<u64>) -> Duration {
        deadline_ms.map_or_else(|| self.config.timing.total_deadline(), Duration::from_millis)
    }

    fn no_folder(&self) -> bool {
        self.config.view.has_header_layout(&["no-folder"])
    }
}

fn to_payload<T: Serialize>(value: &T) -> Result<serde_json::Value> {
    serde_json::to_value(value)
        .map_err(|e| ReadyError::Contract(format!("failed to encode payload: {e}")))
}

fn emit_event<T: Serialize>(
    event_tx: &broadcast::Sender<EventEnvelope>,
    event: &str,
    payload: &T,
) {
    match serde_json::to_value(payload) {
        Ok(payload) => {
            let envelope = EventEnvelope::new(uuid::Uuid::new_v4().to_string(), event, payload);
            let _ = event_tx.send(envelope);
        }
        Err(e) => warn!(event, error = %e, "failed to encode event payload"),
    }
}
