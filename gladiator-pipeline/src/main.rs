//! glaDIAtor pipeline server (gladiator-server) - Main entry point
//!
//! Serves the job control API over HTTP: starts, reruns and cancels
//! pipeline jobs under the result root and reports their progress.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use gladiator_common::config::{ResultRootInitializer, ResultRootResolver, TomlConfig};
use gladiator_common::events::{EventBus, NotificationQueue};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gladiator_pipeline::services::{JobRegistry, PipelineOrchestrator, ProcessExecutor};
use gladiator_pipeline::{build_router, AppState};

/// Command-line arguments for gladiator-server
#[derive(Parser, Debug)]
#[command(name = "gladiator-server")]
#[command(about = "DIA proteomics pipeline service")]
#[command(version)]
struct Args {
    /// Port to listen on (overrides the config file)
    #[arg(short, long, env = "GLADIATOR_PORT")]
    port: Option<u16>,

    /// Folder holding one directory per analysis
    #[arg(short, long)]
    result_root: Option<PathBuf>,

    /// Service configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let settings = TomlConfig::load_or_default(args.config.as_deref());

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&settings.logging.level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting glaDIAtor pipeline server v{}", env!("CARGO_PKG_VERSION"));

    let result_root = ResultRootResolver::new()
        .with_cli_arg(args.result_root)
        .with_toml(&settings)
        .resolve();
    ResultRootInitializer::new(result_root.clone())
        .ensure_directory_exists()
        .context("Failed to prepare result root")?;
    info!("Result root: {}", result_root.display());

    let orchestrator = Arc::new(PipelineOrchestrator::new(
        Arc::new(ProcessExecutor::new(settings.pipeline.poll_interval())),
        settings.tools.clone(),
        result_root.clone(),
        NotificationQueue::new(),
        EventBus::new(settings.pipeline.event_capacity),
    ));
    let registry = JobRegistry::new(result_root, orchestrator);

    let shutdown = CancellationToken::new();
    let housekeeping =
        registry.spawn_housekeeping(settings.pipeline.housekeeping_interval(), shutdown.clone());

    let port = args.port.unwrap_or(settings.port);
    let bind_address = settings.bind_address.clone();
    let app = build_router(AppState::new(registry, settings));

    let addr: SocketAddr = format!("{}:{}", bind_address, port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", bind_address, port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    shutdown.cancel();
    let _ = housekeeping.await;
    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
