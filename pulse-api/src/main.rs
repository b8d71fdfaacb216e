//! pulse-api - Basis Pulse marketplace service
//!
//! Startup order: resolve configuration, initialize logging, open the
//! database, bootstrap the admin account, start the hold sweeper, serve HTTP.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use pulse_common::config::{CliOverrides, ConfigResolver, RootFolderInitializer};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pulse_api::services::{accounts, hold_sweeper, RazorpayClient};
use pulse_api::AppState;

/// Command-line arguments for pulse-api
#[derive(Parser, Debug)]
#[command(name = "pulse-api")]
#[command(about = "Basis Pulse SAP support marketplace API")]
#[command(version)]
struct Args {
    /// Root folder holding the database
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// Path to a TOML configuration file
    #[arg(short, long, env = "PULSE_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, e.g. 127.0.0.1:5780
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = ConfigResolver::new(CliOverrides {
        root_folder: args.root_folder,
        bind: args.bind,
        config_path: args.config,
    })
    .resolve()
    .context("Invalid configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("pulse_api={0},pulse_common={0},tower_http=info", config.log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting pulse-api v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE"),
    );

    let initializer = RootFolderInitializer::new(config.root_folder.clone());
    initializer
        .ensure_directory_exists()
        .context("Failed to initialize root folder")?;

    let db_path = initializer.database_path();
    info!("Database: {}", db_path.display());
    let db = pulse_common::db::init_database(&db_path)
        .await
        .context("Failed to open database")?;

    match (&config.auth.admin_email, &config.auth.admin_password) {
        (Some(email), Some(password)) => {
            accounts::ensure_admin(&db, email, password)
                .await
                .context("Failed to bootstrap admin account")?;
        }
        _ => info!("No admin credentials configured; skipping admin bootstrap"),
    }

    if !config.razorpay.is_configured() {
        warn!("Razorpay keys not configured; bookings will fail at checkout");
    }
    let gateway = RazorpayClient::new(config.razorpay.clone())
        .context("Failed to build Razorpay client")?;

    let bind = config.bind.clone();
    let state = AppState::new(db, config, Arc::new(gateway));

    let sweeper = hold_sweeper::spawn_hold_sweeper(state.clone());

    let app = pulse_api::build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind to {}", bind))?;
    info!("Listening on http://{}", bind);
    info!("Health check: http://{}/health", bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    sweeper.abort();
    info!("Server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
}
