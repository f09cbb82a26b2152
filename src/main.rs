//! Caravan - multi-city campaign orchestration with live telemetry.
//!
//! # Configuration
//!
//! All configuration comes from environment variables:
//!
//! - `CARAVAN_PORT` - listen port (default 8000)
//! - `CARAVAN_DATABASE_URL` - SQLite connection string
//! - `CARAVAN_CITIES` - comma-separated city roster to provision
//! - `CARAVAN_WORKER_CMD` - shell command to launch one worker per
//!   campaign; when unset campaigns run without workers
//! - `CARAVAN_HALT_GRACE_SECS` - grace period for worker halt

use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use caravan::api::{AppState, router};
use caravan::orchestrator::{DEFAULT_HALT_GRACE, Orchestrator};
use caravan::storage::Storage;
use caravan::worker::{DetachedSupervisor, ProcessSupervisor, WorkerSupervisor};

/// Default port if not specified via environment variable.
const DEFAULT_PORT: u16 = 8000;

/// Default database path if not specified via environment variable.
const DEFAULT_DB_PATH: &str = "sqlite:caravan.db?mode=rwc";

/// Default city roster if not specified via environment variable.
const DEFAULT_CITIES: &str = "Delhi,Mumbai,Pune,Bangalore,Lucknow,Jaipur,Indore,Patna";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("caravan=info".parse()?))
        .init();

    // Load configuration from environment
    let port: u16 = env::var("CARAVAN_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_PORT);

    let db_url = env::var("CARAVAN_DATABASE_URL").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string());

    let cities: Vec<String> = env::var("CARAVAN_CITIES")
        .unwrap_or_else(|_| DEFAULT_CITIES.to_string())
        .split(',')
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect();

    let halt_grace = env::var("CARAVAN_HALT_GRACE_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_HALT_GRACE);

    let supervisor: Arc<dyn WorkerSupervisor> = match env::var("CARAVAN_WORKER_CMD") {
        Ok(cmd) if !cmd.trim().is_empty() => {
            info!(command = %cmd, "Using process worker supervisor");
            Arc::new(ProcessSupervisor::new(cmd))
        }
        _ => {
            info!("No worker command configured, campaigns run detached");
            Arc::new(DetachedSupervisor)
        }
    };

    info!(port, db_url = %db_url, cities = cities.len(), "Starting Caravan server");

    // Initialize storage
    let storage = Storage::new(&db_url).await?;
    info!("Database initialized");

    // Wire the core and reinstate campaigns from the previous run
    let orchestrator = Arc::new(Orchestrator::new(storage, supervisor, &cities, halt_grace));
    let recovered = orchestrator.recover().await?;
    info!(recovered, "Orchestrator ready");

    let state = AppState {
        orchestrator: Arc::clone(&orchestrator),
    };
    let app = router(state).layer(TraceLayer::new_for_http());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;

    info!(%addr, "Caravan is listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop every campaign and close observer queues before exit.
    info!("Shutting down");
    orchestrator.drain().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
    }
}
