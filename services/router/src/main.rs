//! minetd
//!
//! Hostname router for game servers sharing one public port.
//!
//! This service:
//! - Loads hostname -> backend port routes from a config file
//! - Accepts TCP connections on the public port
//! - Peeks the client handshake to learn the requested hostname
//! - Relays the connection to the matching loopback backend
//! - Reloads routes on SIGHUP

use std::io;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use minetd_router::{Config, Listener, LogFormat, Reloader, RouteTable, RouterError};

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();
    init_tracing(&config);

    match run(config).await {
        Ok(()) => {
            info!("Shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, reason = e.reason_code(), "Fatal error");
            ExitCode::from(e.exit_code())
        }
    }
}

/// Initialize tracing (prefer RUST_LOG, fallback to --log-level).
fn init_tracing(config: &Config) {
    let json = config.log_format == LogFormat::Json;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .init();
}

async fn run(config: Config) -> Result<(), RouterError> {
    info!("Starting minetd");

    // Registered first so a SIGHUP during startup is queued, not fatal.
    let hangup = signal(SignalKind::hangup()).map_err(RouterError::Signal)?;

    let source = config.route_source();
    let (config_path, table) = source.load_table()?;
    info!(
        config_path = %config_path.display(),
        route_count = table.len(),
        bind_addr = %config.bind_addr(),
        backend_ip = %config.backend_ip,
        reload_policy = ?config.on_reload_failure,
        "Configuration loaded"
    );

    let route_table = Arc::new(RouteTable::with_table(table));

    let listener_config = config.listener_config();
    let bind_addr = listener_config.bind_addr;
    let listener = Listener::bind(listener_config, Arc::clone(&route_table))
        .await
        .map_err(|source| RouterError::Bind {
            addr: bind_addr,
            source,
        })?;

    let reloader = Reloader::new(source, route_table, config.on_reload_failure);

    tokio::select! {
        result = listener.run() => result.map_err(RouterError::Listener),
        result = reloader.run(hangup) => result,
        result = shutdown_signal() => {
            result.map_err(RouterError::Signal)?;
            info!("Shutdown signal received");
            Ok(())
        }
    }
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() -> io::Result<()> {
    let mut terminate = signal(SignalKind::terminate())?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
    }
}
