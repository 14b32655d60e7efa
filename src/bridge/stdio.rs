//! Newline-delimited JSON transport for the bridge.
//!
//! Reads `CommandEnvelope` lines from the input, dispatches them through the
//! [`BridgeServer`](crate::bridge::channel::BridgeServer) router, and writes
//! `ResponseEnvelope` and `EventEnvelope` lines to the output.
//!
//! When run over stdio, stdout is reserved for the protocol; all diagnostic
//! output goes to stderr.

use crate::bridge::channel::{BridgeClient, bridge_channel};
use crate::bridge::contract::{CommandEnvelope, CommandName, ResponseEnvelope};
use crate::config::ReadyConfig;
use crate::error::{ReadyError, Result};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

type SharedWriter<W> = Arc<Mutex<BufWriter<W>>>;

/// Run the bridge on stdin/stdout until stdin closes or `bridge.stop`.
pub async fn run_stdio_bridge(config: ReadyConfig) -> Result<()> {
    run_bridge(config, tokio::io::stdin(), tokio::io::stdout()).await
}

/// Run the bridge over arbitrary line streams.
///
/// Three tasks cooperate: the router, an event forwarder, and the reader,
/// which runs on the calling task. The bridge exits when the reader does;
/// dropping the client then stops the router.
pub async fn run_bridge<R, W>(config: ReadyConfig, input: R, output: W) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (client, server) = bridge_channel(config)?;
    let writer: SharedWriter<W> = Arc::new(Mutex::new(BufWriter::new(output)));

    let server_handle = tokio::spawn(server.run());

    let event_writer = Arc::clone(&writer);
    let mut event_rx = client.subscribe_events();
    let event_handle = tokio::spawn(async move {
        loop {
            match event_rx.recv().await {
                Ok(envelope) => match serde_json::to_string(&envelope) {
                    Ok(json) => {
                        let mut w = event_writer.lock().await;
                        if let Err(e) = write_line(&mut w, &json).await {
                            warn!(error = %e, "failed to write event; stopping event forwarder");
                            break;
                        }
                    }
                    Err(e) => error!(error = %e, "failed to serialize event envelope; skipping"),
                },
                Err(RecvError::Lagged(n)) => {
                    warn!(lagged = n, "event forwarder lagged; some events were dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let reader_result = run_reader(client, input, Arc::clone(&writer)).await;

    event_handle.abort();
    let _ = event_handle.await;
    let _ = server_handle.await;

    reader_result
}

async fn run_reader<R, W>(client: BridgeClient, input: R, writer: SharedWriter<W>) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(input);
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = reader
            .read_line(&mut line)
            .await
            .map_err(|e| ReadyError::Channel(format!("failed to read command line: {e}")))?;
        if bytes_read == 0 {
            info!("input closed; shutting down bridge");
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let envelope: CommandEnvelope = match serde_json::from_str(trimmed) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, raw_line = %trimmed, "failed to parse command envelope");
                let response = ResponseEnvelope::error(
                    "parse-error",
                    format!("failed to parse command envelope: {e}"),
                );
                send_response(&writer, &response).await?;
                continue;
            }
        };

        let is_stop = envelope.command == CommandName::BridgeStop;
        let request_id = envelope.request_id.clone();
        let response = match client.send(envelope).await {
            Ok(response) => response,
            Err(e) => {
                warn!(request_id = %request_id, error = %e, "bridge dispatch failed");
                ResponseEnvelope::error(request_id, format!("dispatch failed: {e}"))
            }
        };
        send_response(&writer, &response).await?;

        if is_stop {
            info!("bridge.stop received; shutting down bridge");
            break;
        }
    }
    Ok(())
}

async fn send_response<W: AsyncWrite + Unpin>(
    writer: &SharedWriter<W>,
    response: &ResponseEnvelope,
) -> Result<()> {
    let json = serde_json::to_string(response)
        .map_err(|e| ReadyError::Contract(format!("failed to serialize response: {e}")))?;
    let mut w = writer.lock().await;
    write_line(&mut w, &json).await
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut BufWriter<W>, json: &str) -> Result<()> {
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}
