//! podfleetd — the podfleet daemon.
//!
//! Single binary that assembles the scheduler and its collaborators:
//! - RunPod provisioning client
//! - ComfyUI engine connector
//! - Scheduler (queue, pod pool, driver, job monitors)
//! - REST API
//!
//! # Usage
//!
//! ```text
//! podfleetd run --config /etc/podfleet/fleet.toml --port 8080
//! podfleetd check-config --config fleet.toml
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use podfleet_engine::ComfyConnector;
use podfleet_provider::RunpodClient;
use podfleet_scheduler::{BroadcastSink, RequestEvent, Scheduler};
use podfleet_state::FleetConfig;
use podfleet_state::config::API_KEY_ENV;

#[derive(Parser)]
#[command(name = "podfleetd", about = "GPU pod scheduler daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler and serve the REST API.
    Run {
        /// Fleet configuration file. Built-in defaults when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Port to listen on.
        #[arg(long, default_value = "8080")]
        port: u16,
    },
    /// Validate a configuration file and print the effective settings.
    CheckConfig {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

/// Used when `RUST_LOG` is unset. Targets are crate names, so each
/// workspace crate is listed.
const DEFAULT_LOG_FILTER: &str = "info,podfleetd=debug,podfleet_state=debug,\
podfleet_provider=debug,podfleet_engine=debug,podfleet_scheduler=debug,podfleet_api=debug";

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    match cli.command {
        Command::Run { config, port } => run(config, port).await,
        Command::CheckConfig { config } => {
            let config = FleetConfig::load(config.as_deref())?;
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

async fn run(config_path: Option<PathBuf>, port: u16) -> anyhow::Result<()> {
    info!("podfleet daemon starting");

    let config = FleetConfig::load(config_path.as_deref()).with_context(|| match &config_path {
        Some(path) => format!("loading config from {}", path.display()),
        None => "loading default config".to_string(),
    })?;
    if config.provider.api_key.is_empty() {
        warn!(env = API_KEY_ENV, "no provider API key configured");
    }

    // ── Initialize subsystems ──────────────────────────────────

    let provider = RunpodClient::new(
        config.provider.api_url.clone(),
        config.provider.api_key.clone(),
        config.engine.port,
        config.provider.request_timeout,
    )?;
    info!(api_url = %config.provider.api_url, "provider client initialized");

    let connector = ComfyConnector::new(config.engine.request_timeout, config.engine.probe_timeout)?;
    info!(port = config.engine.port, "engine connector initialized");

    let sink = BroadcastSink::default();
    let events = tokio::spawn(log_events(sink.clone()));

    let scheduler = Arc::new(Scheduler::new(
        &config,
        Arc::new(provider),
        Arc::new(connector),
        Arc::new(sink),
    ));
    scheduler.start().await;
    info!(
        tick = ?config.scheduler.tick_interval,
        max_in_flight = config.scheduler.max_in_flight,
        "scheduler started"
    );

    // ── Start API server ───────────────────────────────────────

    let router = podfleet_api::build_router(scheduler.clone());
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // ── Shutdown ───────────────────────────────────────────────

    scheduler.stop().await;
    events.abort();

    info!("podfleet daemon stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

/// Log terminal request events until the sink goes away.
async fn log_events(sink: BroadcastSink) {
    let mut rx = sink.subscribe();
    loop {
        match rx.recv().await {
            Ok(RequestEvent::Completed { request_id, result }) => {
                debug!(%request_id, %result, "request event: completed");
            }
            Ok(RequestEvent::Failed { request_id, error }) => {
                debug!(%request_id, %error, "request event: failed");
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "request event log lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_names_every_crate_target() {
        for target in [
            "podfleetd",
            "podfleet_state",
            "podfleet_provider",
            "podfleet_engine",
            "podfleet_scheduler",
            "podfleet_api",
        ] {
            let directive = format!("{target}=debug");
            assert!(
                DEFAULT_LOG_FILTER.split(',').any(|d| d == directive),
                "missing {directive}"
            );
        }
        assert!(tracing_subscriber::EnvFilter::try_new(DEFAULT_LOG_FILTER).is_ok());
    }
}
