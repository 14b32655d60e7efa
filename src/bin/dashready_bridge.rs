//! Headless readiness bridge for stdin/stdout JSON communication.
//!
//! Reads `CommandEnvelope` messages as newline-delimited JSON from stdin and
//! writes `ResponseEnvelope` and `EventEnvelope` messages to stdout.
//!
//! All tracing output goes to stderr so that stdout remains a clean JSON
//! protocol channel.

use clap::Parser;
use dashready::ReadyConfig;
use dashready::bridge::run_stdio_bridge;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Dashboard readiness bridge.
#[derive(Parser)]
#[command(name = "dashready-bridge", version, about)]
struct Cli {
    /// Path to TOML configuration file. Defaults to the user config path
    /// when it exists.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Host base URL; overrides `bridge.base_url`.
    #[arg(long)]
    base_url: Option<String>,

    /// Overall cycle deadline in milliseconds; overrides `timing.total_deadline_ms`.
    #[arg(long)]
    deadline_ms: Option<u64>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("dashready=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    let config = apply_overrides(config, cli)?;

    tracing::info!(
        poll_interval_ms = config.timing.poll_interval_ms,
        total_deadline_ms = config.timing.total_deadline_ms,
        "dashready-bridge starting"
    );

    run_stdio_bridge(config).await.map_err(|e| {
        tracing::error!(error = %e, "dashready-bridge exited with error");
        anyhow::anyhow!("dashready-bridge failed: {e}")
    })?;

    tracing::info!("dashready-bridge shut down cleanly");
    Ok(())
}

/// Layer command-line overrides on top of the file config and validate.
fn apply_overrides(mut config: ReadyConfig, cli: Cli) -> anyhow::Result<ReadyConfig> {
    if let Some(base_url) = cli.base_url {
        config.bridge.base_url = Some(base_url);
    }
    if let Some(deadline_ms) = cli.deadline_ms {
        config.timing.total_deadline_ms = deadline_ms;
    }
    config.validate()?;
    Ok(config)
}

fn load_config(explicit: Option<&std::path::Path>) -> anyhow::Result<ReadyConfig> {
    if let Some(path) = explicit {
        return Ok(ReadyConfig::from_file(path)?);
    }
    let default_path = ReadyConfig::default_config_path();
    if default_path.is_file() {
        tracing::debug!(path = %default_path.display(), "loading default config");
        return Ok(ReadyConfig::from_file(&default_path)?);
    }
    Ok(ReadyConfig::default())
}
