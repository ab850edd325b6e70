use std::fs::OpenOptions;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    Stdio,
    Stream,
}

/// Install the global subscriber.
///
/// Stdio mode never writes to stderr: MCP clients treat early stderr output as
/// a broken handshake. Logs go to `log_file` when one is given. Stream mode
/// also logs to stderr.
pub fn init_logging(mode: TransportMode, log_file: Option<String>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = match log_file {
        Some(name) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&name)
                .with_context(|| format!("Failed to open log file {}", name))?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    let stderr_layer =
        (mode == TransportMode::Stream).then(|| fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;
    Ok(())
}
