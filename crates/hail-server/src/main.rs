//! # hail-server
//!
//! Call-session coordinator service.
//!
//! This binary provides:
//! - **Endpoint registry** with heartbeat liveness and eviction sweeps
//! - **Call signaling**: lifecycle state machine, negotiation payload
//!   relay, and a WebSocket push channel per endpoint
//! - **Presence fanout** to subscribed observers
//! - **Durable call history** in SQLite, queryable over the REST API
//! - **Per-IP rate limiting** to protect against abuse

mod api;
mod config;
mod error;
mod push;
mod rate_limit;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use hail_core::Coordinator;
use hail_store::{Database, Ledger};

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::rate_limit::RateLimiter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,hail_server=debug")),
        )
        .init();

    info!("Starting Hail coordinator v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------

    // Call history ledger (creates the database if missing)
    let database = match &config.history_db_path {
        Some(path) => Database::open_at(path)?,
        None => Database::new()?,
    };

    // Coordinator core: registry, call manager, router, presence
    let coordinator = Arc::new(Coordinator::new(
        config.coordinator_config(),
        Ledger::new(database),
    ));

    let rate_limiter = RateLimiter::new(config.rate_limit_per_sec, config.rate_limit_burst);

    let app_state = AppState {
        coordinator: coordinator.clone(),
        rate_limiter: rate_limiter.clone(),
        config: Arc::new(config.clone()),
    };

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Heartbeat sweep: evict endpoints whose heartbeat has lapsed and
    // cascade the failure into any call they were part of.
    let sweeper = coordinator.clone();
    let sweep_interval = config.sweep_interval;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_interval);
        loop {
            interval.tick().await;
            let evicted = sweeper.sweep_stale().await;
            if evicted > 0 {
                info!(evicted, "Heartbeat sweep evicted endpoints");
            }
        }
    });

    // Periodic rate limiter cleanup (every 5 minutes, evict buckets idle >10 min)
    let rl = rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            interval.tick().await;
            rl.purge_stale(600.0).await;
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    // tokio::select! ensures that if either the HTTP server or a shutdown
    // signal arrives, we exit cleanly.
    let http_addr = config.http_addr;
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
