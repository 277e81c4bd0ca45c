//! Castgate Server - headless daemon for the castgate session machine.
//!
//! Runs the session lifecycle of a screen-mirroring sink and exposes it over
//! HTTP/WebSocket, where the discovery controller, player and UI connect.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use castgate_core::{
    bind_listener, bootstrap_services, serve, FriendlyNameSource, HostnameFriendlyName,
    StaticFriendlyName,
};
use clap::Parser;
use tokio::signal;

use crate::config::ServerConfig;

/// Castgate Server - screen-mirroring session lifecycle daemon.
#[derive(Parser, Debug)]
#[command(name = "castgate-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "CASTGATE_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Bind port (overrides config file).
    #[arg(short = 'p', long)]
    port: Option<u16>,

    /// Accept connections without waiting for a client decision.
    #[arg(long)]
    auto_accept: bool,

    /// Name advertised to peers (overrides config file).
    #[arg(short = 'n', long)]
    friendly_name: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Castgate Server v{}", env!("CARGO_PKG_VERSION"));

    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // Apply CLI overrides
    if let Some(port) = args.port {
        config.bind_port = port;
    }
    if args.auto_accept {
        config.auto_accept = true;
    }
    if let Some(name) = args.friendly_name {
        config.friendly_name = Some(name);
    }

    log::info!(
        "Configuration: bind_port={}, auto_accept={}, enable_on_start={}",
        config.bind_port,
        config.auto_accept,
        config.enable_on_start
    );

    let friendly_name: Arc<dyn FriendlyNameSource> = match &config.friendly_name {
        Some(name) => Arc::new(StaticFriendlyName::new(name.clone())),
        None => Arc::new(HostnameFriendlyName),
    };

    let core_config = config.to_core_config();
    let handle = tokio::runtime::Handle::current();
    let services = bootstrap_services(&core_config, handle, Some(friendly_name))
        .context("Failed to bootstrap services")?;

    log::info!("Services bootstrapped successfully");

    // Bind before starting the machine so clients can observe the first transitions
    let (port, listener) = bind_listener(core_config.preferred_port)
        .await
        .context("Failed to bind API listener")?;

    let app_state = services.app_state();
    let cancel = services.cancel_token.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = serve(listener, app_state, cancel).await {
            log::error!("Server error: {}", e);
        }
    });

    log::info!("HTTP server started on port {}", port);

    services.start_background_tasks();

    shutdown_signal().await;

    log::info!("Shutdown signal received, cleaning up...");

    // Machine teardown and the event-loop join block; keep them off the runtime workers
    let teardown = services.clone();
    tokio::task::spawn_blocking(move || teardown.shutdown())
        .await
        .context("Shutdown task failed")?;

    if let Err(e) = server_handle.await {
        log::warn!("Server task ended abnormally: {}", e);
    }

    log::info!("Shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl+C: {}", e);
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
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
