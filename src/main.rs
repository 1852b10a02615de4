//! Arborwatch - Alert Dispatch Engine
//!
//! Real-time alert dispatch and volunteer matching for tree care
//! operations.
//!
//! # Usage
//!
//! ```bash
//! # Run with defaults (sled data under ./data/arborwatch, port 8080)
//! cargo run --release
//!
//! # Point at a config file and a different port
//! ARBORWATCH_CONFIG=arborwatch.toml ARBORWATCH_PORT=9090 cargo run --release
//! ```
//!
//! # Environment Variables
//!
//! - `ARBORWATCH_CONFIG`: path to a TOML config file
//! - `ARBORWATCH_*`: per-option overrides (see `config` module)
//! - `RUST_LOG`: logging level (default: info)
//! - `RESET_DB`: set to "true" to wipe persistent data on startup

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use arborwatch::api::{create_app, AppState};
use arborwatch::auth::AuthKeys;
use arborwatch::config::EngineConfig;
use arborwatch::dispatch::DispatchEngine;
use arborwatch::lifecycle::LifecycleManager;
use arborwatch::matcher::Matcher;
use arborwatch::providers::{
    CalendarClient, CalendarProvider, OpenWeatherClient, SledTreeRepository,
    TreeRepository, WeatherProvider,
};
use arborwatch::push::{BroadcastHub, PushBus};
use arborwatch::store::{self, AlertStore, VolunteerStore};
use arborwatch::sweeps::{CalendarSweep, RetrySweep, WeatherSweep};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "arborwatch")]
#[command(about = "Arborwatch alert dispatch and volunteer matching engine")]
#[command(version)]
struct CliArgs {
    /// Override the server bind address (default: "0.0.0.0:<port>")
    #[arg(short, long)]
    addr: Option<String>,

    /// Path to a TOML config file (equivalent to ARBORWATCH_CONFIG)
    #[arg(long, env = "ARBORWATCH_CONFIG")]
    config: Option<String>,

    /// Reset all persistent data (alerts, volunteers, indexes) on startup.
    /// WARNING: destructive. Can also be set via RESET_DB=true.
    #[arg(long)]
    reset_db: bool,
}

/// Check if a database reset is requested via CLI flag or environment.
fn should_reset_db(cli_flag: bool) -> bool {
    if cli_flag {
        return true;
    }
    if let Ok(val) = std::env::var("RESET_DB") {
        let val = val.to_lowercase();
        return val == "true" || val == "1" || val == "yes";
    }
    false
}

/// Remove the data directory before any storage initialization.
fn reset_data_directory(path: &str) -> Result<()> {
    let data_path = std::path::Path::new(path);
    if !data_path.exists() {
        info!("Data directory does not exist, nothing to reset");
        return Ok(());
    }
    warn!("RESET_DB requested — removing {}", data_path.display());
    std::fs::remove_dir_all(data_path).context("Failed to remove data directory")?;
    warn!("Data directory removed; a fresh database will be created");
    Ok(())
}

// ============================================================================
// Bootstrap
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = CliArgs::parse();
    if let Some(path) = &args.config {
        // EngineConfig::load reads ARBORWATCH_CONFIG; the flag is sugar.
        std::env::set_var("ARBORWATCH_CONFIG", path);
    }

    let config = EngineConfig::load();

    info!("🌳 Starting Arborwatch Dispatch Engine");
    config.echo();

    if config.jwt_secret.is_empty() {
        warn!("ARBORWATCH_JWT_SECRET is empty — credentials will not be interoperable");
    }

    if should_reset_db(args.reset_db) {
        reset_data_directory(&config.db_path)?;
    }

    // Storage
    let db = store::open_db(&config.db_path).context("Failed to open engine database")?;
    let alerts = AlertStore::open(&db).context("Failed to open alert store")?;
    let volunteers = VolunteerStore::open(&db).context("Failed to open volunteer store")?;
    let trees: Arc<dyn TreeRepository> =
        Arc::new(SledTreeRepository::open(&db).context("Failed to open tree repository")?);
    info!("✓ Storage initialized at {}", config.db_path);

    // Push bus — injected capability, no ambient singleton.
    let hub = BroadcastHub::new();
    let push: Arc<dyn PushBus> = Arc::new(hub.clone());

    // Core components
    let matcher = Matcher::new(volunteers.clone());
    let dispatch = Arc::new(DispatchEngine::new(
        alerts.clone(),
        matcher.clone(),
        trees.clone(),
        push.clone(),
        config.match_radius_m(),
    ));
    let lifecycle = Arc::new(LifecycleManager::new(
        alerts.clone(),
        volunteers.clone(),
        push.clone(),
    ));

    // External providers
    if config.weather_api_key.is_empty() {
        warn!("Weather API key is empty — weather sweeps will fail per-tree until configured");
    }
    let weather: Arc<dyn WeatherProvider> = Arc::new(
        OpenWeatherClient::new(&config.weather_api_key)
            .context("Failed to build weather client")?,
    );
    let calendar: Arc<dyn CalendarProvider> = Arc::new(
        CalendarClient::google(config.calendar.clone())
            .context("Failed to build calendar client")?,
    );

    // Schedulers
    let weather_sweep = Arc::new(WeatherSweep::new(
        trees.clone(),
        weather,
        dispatch.clone(),
        config.thresholds.clone(),
        Duration::from_secs(config.weather_poll_interval_secs),
    ));
    let retry_sweep = Arc::new(RetrySweep::new(
        alerts.clone(),
        matcher.clone(),
        lifecycle.clone(),
        trees.clone(),
        push.clone(),
        Duration::from_secs(config.retry_poll_interval_secs),
    ));
    let calendar_sweep = Arc::new(CalendarSweep::new(
        trees.clone(),
        calendar,
        alerts.clone(),
        dispatch.clone(),
        config.calendar.care_keywords.clone(),
        Duration::from_secs(config.calendar_poll_interval_secs),
    ));

    let cancel = CancellationToken::new();
    let sweep_handles = vec![
        weather_sweep.clone().start(cancel.child_token()),
        retry_sweep.clone().start(cancel.child_token()),
        calendar_sweep.clone().start(cancel.child_token()),
    ];
    info!("✓ Schedulers running (weather, retry, calendar)");

    // HTTP + push surface
    let state = AppState {
        alerts,
        volunteers,
        dispatch,
        lifecycle,
        weather_sweep,
        calendar_sweep,
        hub,
        auth: AuthKeys::new(&config.jwt_secret, config.jwt_expiry_hours),
        started_at: chrono::Utc::now(),
        allowed_client_origin: config.allowed_client_origin.clone(),
    };
    let app = create_app(state);

    let addr = args.addr.unwrap_or_else(|| config.server_addr());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("🚀 Listening on {addr}");

    let shutdown_token = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            shutdown_token.cancel();
        })
        .await
        .context("Server error")?;

    // Let the schedulers observe the cancellation before exit.
    for handle in sweep_handles {
        let _ = handle.await;
    }
    db.flush_async().await.context("Final flush failed")?;
    info!("🛑 Shutdown complete");
    Ok(())
}

/// Resolve on ctrl-c or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
