//! # herald
//!
//! Server binary: loads settings, installs logging and metrics, then serves
//! GraphQL subscriptions over `graphql-ws` until ctrl-c.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use herald_logging::LogFormat;
use herald_server::config::broker_config;
use herald_server::{HeraldServer, ServerConfig};
use herald_settings::HeraldSettings;

/// GraphQL subscription broker over WebSocket.
#[derive(Parser, Debug)]
#[command(name = "herald", about = "GraphQL subscription broker over WebSocket")]
struct Cli {
    /// Settings file (defaults to `~/.herald/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Log level or `RUST_LOG`-style filter (overrides settings).
    #[arg(long)]
    log_level: Option<String>,

    /// Log output format: `compact` or `json` (overrides settings).
    #[arg(long)]
    log_format: Option<String>,

    /// Skip installing the Prometheus recorder.
    #[arg(long)]
    no_metrics: bool,
}

impl Cli {
    fn load_settings(&self) -> Result<HeraldSettings> {
        let path = self.config.clone().unwrap_or_else(herald_settings::settings_path);
        let mut settings = herald_settings::load_settings_from_path(&path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?;
        self.apply(&mut settings)?;
        Ok(settings)
    }

    /// Flags win over file and environment.
    fn apply(&self, settings: &mut HeraldSettings) -> Result<()> {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if let Some(format) = &self.log_format {
            settings.logging.format =
                LogFormat::parse(format).with_context(|| format!("Unknown log format: {format}"))?;
        }
        Ok(())
    }
}

/// Run `f` with warnings printed before the configured subscriber exists.
fn with_startup_logging<T>(f: impl FnOnce() -> T) -> T {
    tracing::subscriber::with_default(herald_logging::bootstrap_subscriber(), f)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = with_startup_logging(|| cli.load_settings())?;

    herald_logging::init_subscriber(&settings.logging.level, settings.logging.format);

    let metrics = if cli.no_metrics {
        None
    } else {
        Some(herald_server::metrics::install_recorder().context("Failed to install metrics recorder")?)
    };

    let config = ServerConfig::from_settings(&settings);
    let shutdown_timeout = config.shutdown_timeout;
    let server = HeraldServer::new(config, broker_config(&settings.broker), metrics);

    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!("herald listening on ws://{addr}{}", server.config().endpoint);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    if !server.shutdown().drain(vec![handle], shutdown_timeout).await {
        tracing::warn!("server did not stop within {shutdown_timeout:?}");
    }
    tracing::info!("Shutdown complete");
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
