//! formsync - Replicates paginated form submissions into tabular destinations
//!
//! This is the main entry point for the formsync service.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use formsync::app::{build_orchestrator, build_state, spawn_limiter_cleanup};
use formsync::config::Config;
use formsync::models::RunOutcome;
use formsync::otel::{init_tracing, OtelProvider, SyncMetrics};
use formsync::server::Server;
use formsync::sync::{SchedulerConfig, SyncScheduler};

/// formsync - Replicates paginated form submissions into tabular destinations
#[derive(Parser, Debug)]
#[command(name = "formsync")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, env = "FORMSYNC_CONFIG")]
    config: Option<String>,

    /// Run one sync, print the report as JSON and exit
    #[arg(long)]
    once: bool,

    /// Sheet group to sync with --once (all groups when omitted)
    #[arg(long, requires = "once")]
    sheet: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Parse CLI arguments
    let args = Args::parse();

    // Load and check configuration
    let config = load_config(&args)?;
    if args.once {
        config.validate_sync()?;
    } else {
        config.validate()?;
    }

    // Initialize OpenTelemetry provider
    let otel_provider = OtelProvider::new(&config.otel)?;

    // Initialize tracing/logging
    init_tracing(&otel_provider, &config.logging)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting formsync");

    let metrics = Arc::new(SyncMetrics::new(&otel_provider.meter()));
    let orchestrator = build_orchestrator(&config, Some(metrics.clone())).await?;

    let code = if args.once {
        run_once(&config, &orchestrator, args.sheet.as_deref()).await?
    } else {
        serve(&config, orchestrator, metrics).await?;
        ExitCode::SUCCESS
    };

    // Shutdown OpenTelemetry
    if let Err(e) = otel_provider.shutdown() {
        error!(error = %e, "Failed to shutdown OpenTelemetry");
    }

    info!("formsync shutdown complete");
    Ok(code)
}

/// Run one sync and print its report
async fn run_once(
    config: &Config,
    orchestrator: &formsync::sync::SyncOrchestrator,
    sheet: Option<&str>,
) -> anyhow::Result<ExitCode> {
    let forms = config.catalog().select(sheet)?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        on_signal.cancel();
    });

    let report = orchestrator.run(forms, cancel).await;
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(match report.outcome {
        RunOutcome::Success => ExitCode::SUCCESS,
        RunOutcome::Partial | RunOutcome::Failed => ExitCode::FAILURE,
    })
}

/// Serve the trigger endpoint and run scheduled syncs until shutdown
async fn serve(
    config: &Config,
    orchestrator: Arc<formsync::sync::SyncOrchestrator>,
    metrics: Arc<SyncMetrics>,
) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    let state = build_state(
        config,
        Arc::clone(&orchestrator),
        Some(metrics),
        shutdown.clone(),
    )?;

    let cleanup = spawn_limiter_cleanup(
        Arc::clone(&state.limiter),
        Duration::from_secs(config.auth.rate_limit.cleanup_interval_secs),
        shutdown.clone(),
    );

    let scheduler = match SchedulerConfig::from_sync(&config.sync) {
        Some(scheduler_config) => {
            let scheduler = SyncScheduler::new(
                scheduler_config,
                orchestrator,
                config.catalog().select(None)?,
                shutdown.clone(),
            );
            Some(tokio::spawn(scheduler.run()))
        }
        None => None,
    };

    // Create and start the HTTP server
    let server = Server::new(config.server.clone(), state);
    let server_shutdown = shutdown.clone();

    info!(
        host = %config.server.host,
        port = %config.server.port,
        "Starting HTTP server"
    );

    let result = server
        .run(async move {
            shutdown_signal().await;
            server_shutdown.cancel();
        })
        .await;

    shutdown.cancel();
    if let Some(handle) = scheduler {
        if let Err(e) = handle.await {
            warn!(error = %e, "Scheduler task failed");
        }
    }
    let _ = cleanup.await;

    result.map_err(Into::into)
}

/// Load configuration from file or environment
fn load_config(args: &Args) -> anyhow::Result<Config> {
    match &args.config {
        Some(path) => {
            // Use eprintln! since tracing is not yet initialized
            eprintln!("Loading configuration from file: {}", path);
            Config::from_file(path).map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
        }
        None => {
            // Use eprintln! since tracing is not yet initialized
            eprintln!("Loading configuration from environment variables");
            Config::from_env().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
        }
    }
}

/// Create a future that resolves when a shutdown signal is received
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
