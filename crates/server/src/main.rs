use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use registrar_core::{
    load_config, validate_config, HttpLandingPageProbe, HttpRegistrationClient,
    SqliteTransactionLog,
};
use registrar_server::{api::create_router, scheduler::ReconcileScheduler, state::AppState};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Determine config path
    let config_path = std::env::var("REGISTRAR_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    // Load configuration
    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    // Validate configuration
    validate_config(&config).context("Configuration validation failed")?;

    info!("Configuration loaded successfully");
    info!("Registration authority: {}", config.authority.url);
    info!("Database path: {:?}", config.database.path);

    // Transaction log
    let log = Arc::new(
        SqliteTransactionLog::new(&config.database.path)
            .context("Failed to open transaction log")?,
    );
    info!("Transaction log initialized");

    // External collaborators
    let authority = Arc::new(
        HttpRegistrationClient::new(config.authority.clone())
            .context("Failed to create registration client")?,
    );
    let probe = Arc::new(
        HttpLandingPageProbe::new(config.validator.probe_timeout())
            .context("Failed to create landing page probe")?,
    );

    let state = Arc::new(AppState::new(config.clone(), log, authority, probe));

    // Reconcile cadence
    let scheduler = if config.reconciler.enabled {
        let scheduler =
            ReconcileScheduler::new(Arc::clone(state.reconciler()), config.reconciler.interval());
        scheduler.start();
        info!(
            "Reconcile scheduler started (every {}s)",
            config.reconciler.interval_secs
        );
        Some(scheduler)
    } else {
        info!("Reconcile scheduler disabled in config");
        None
    };

    // Create router
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutting down...");
    if let Some(ref scheduler) = scheduler {
        info!("Stopping reconcile scheduler...");
        scheduler.stop().await;
        info!("Reconcile scheduler stopped");
    }

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
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
                error!("Failed to install SIGTERM handler: {}", e);
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
