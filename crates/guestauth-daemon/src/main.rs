//! guestauthd - Guest Authentication Broker Daemon
//!
//! Binds the public bootstrap socket, sweeps the alias store for tampered
//! files, then serves wire-protocol requests until SIGINT/SIGTERM. Socket
//! files are removed on shutdown.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use guestauth_core::config::BrokerConfig;
use guestauth_core::context::ServiceContext;
use guestauth_daemon::integrity;
use guestauth_daemon::protocol::{serve_connection, Dispatcher, SocketManager};
use guestauth_daemon::state::DaemonState;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// guestauth daemon - host-side guest authentication broker
#[derive(Parser, Debug)]
#[command(name = "guestauthd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to broker configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the alias store directory
    #[arg(long)]
    store_dir: Option<PathBuf>,

    /// Override the socket directory
    #[arg(long)]
    socket_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Append logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn init_tracing(level: &str, log_file: Option<&PathBuf>) -> Result<()> {
    // RUST_LOG wins over the flag so operators can raise per-module levels.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(Arc::new(file))
                .with_ansi(false)
                .init();
        },
        None => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
    Ok(())
}

fn load_config(args: &Args) -> Result<BrokerConfig> {
    let mut config = match &args.config {
        Some(path) => BrokerConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => BrokerConfig::default(),
    };
    if let Some(dir) = &args.store_dir {
        config.store_dir.clone_from(dir);
    }
    if let Some(dir) = &args.socket_dir {
        config.socket_dir.clone_from(dir);
    }
    config.validate().context("validating configuration")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level, args.log_file.as_ref())?;

    let config = load_config(&args)?;
    info!(
        store_dir = %config.store_dir.display(),
        socket_dir = %config.socket_dir.display(),
        superuser = %config.superuser,
        "starting guestauthd"
    );

    let service = Arc::new(ServiceContext::new(config.clone()));

    // Refuse to serve from a store we cannot trust.
    let report = integrity::sweep(service.store()).context("alias store integrity sweep")?;
    if !report.quarantined.is_empty() {
        warn!(
            count = report.quarantined.len(),
            "tampered store files were quarantined at startup"
        );
    }

    let mut manager = SocketManager::bind(&config.socket_dir, config.max_connections)
        .context("binding listener sockets")?;
    let state = Arc::new(DaemonState::new());
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&service),
        Arc::clone(&state),
        manager.registry(),
    ));
    let idle_timeout = Duration::from_secs(config.idle_timeout_secs);

    let mut sigint = signal(SignalKind::interrupt()).context("installing SIGINT handler")?;
    let mut sigterm = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;

    info!(
        public_socket = %manager.public_socket_path().display(),
        "guestauthd ready"
    );

    loop {
        tokio::select! {
            accepted = manager.accept() => {
                match accepted {
                    Ok(accepted) => {
                        let dispatcher = Arc::clone(&dispatcher);
                        tokio::spawn(serve_connection(dispatcher, accepted, idle_timeout));
                    },
                    Err(e) => {
                        warn!(error = %e, "accept loop stopped");
                        break;
                    },
                }
            },
            _ = sigint.recv() => {
                info!("received SIGINT, shutting down");
                break;
            },
            _ = sigterm.recv() => {
                info!("received SIGTERM, shutting down");
                break;
            },
        }
    }

    state.request_shutdown();
    manager.cleanup();
    info!("guestauthd stopped");
    Ok(())
}
