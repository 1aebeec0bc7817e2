//! # bleadvert-server
//!
//! HTTP server for bleadvert.
//!
//! This binary provides:
//! - REST API for scanning sessions, sample ingestion and reward progress
//! - OpenAPI documentation via Swagger UI
//! - Structured logging to file and stdout
//!
//! ## Running
//!
//! ```bash
//! # Development
//! cargo run --package bleadvert-server
//!
//! # With BlueZ discovery (Linux)
//! cargo run --package bleadvert-server --features bluetooth
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use anyhow::Context;
use bleadvert_core::{default_config_path, Catalog, Config};
use bleadvert_server::api::create_router;
use bleadvert_server::logging;
use bleadvert_server::state::{AppState, SharedState};
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = default_config_path();
    let config = Config::load_or_default(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    logging::init(config.server.production, config.server.log_dir.as_deref())?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        "Starting bleadvert-server"
    );

    let bind_address = config.server.bind_address.clone();
    let state = match AppState::from_config(config.clone()).await {
        Ok(state) => state,
        Err(err) => {
            warn!(error = %err, "Catalog unavailable, serving with in-memory storage and no beacons");
            AppState::in_memory(config, Catalog::default())
        }
    }
    .into_shared();

    spawn_reward_logger(&state).await;

    let app = create_router(state.clone());
    let listener = TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("binding {bind_address}"))?;

    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state))
        .await?;

    info!("Server stopped");
    Ok(())
}

/// Log every reward unlocked by the scanning session.
async fn spawn_reward_logger(state: &SharedState) {
    let mut rewards = state.read().await.session.subscribe_rewards();
    tokio::spawn(async move {
        loop {
            match rewards.recv().await {
                Ok(unlocked) => info!(
                    user = %unlocked.user_id,
                    event = %unlocked.event_id,
                    beacon = %unlocked.beacon_address,
                    reward = %unlocked.reward.title,
                    "Reward unlocked"
                ),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Reward notifications dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}

/// Wait for Ctrl+C, then stop any running session so the in-flight visit is
/// reported and pending scans complete.
async fn shutdown_signal(state: SharedState) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "Failed to listen for shutdown signal");
        return;
    }
    info!("Shutdown requested");

    let mut state_guard = state.write().await;

    #[cfg(feature = "bluetooth")]
    if let Some(scanner) = state_guard.scanner.take() {
        scanner.stop();
    }

    if state_guard.session.is_scanning() {
        match state_guard.session.stop().await {
            Ok(summary) => info!(?summary, "Scanning session stopped"),
            Err(err) => warn!(error = %err, "Failed to stop scanning session"),
        }
    }
}
