mod api;
mod config;
mod db;
mod error;
mod normalizer;
mod source;
mod stats;
mod tracker;
mod types;

#[cfg(test)]
mod testing;

use std::str::FromStr;
use std::sync::Arc;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::api::routes::{router, ApiState};
use crate::config::Config;
use crate::db::{Gateway, SqliteGateway};
use crate::error::Result;
use crate::source::{HttpSnapshotSource, SnapshotSource};
use crate::stats::StatsAggregator;
use crate::tracker::{HealthMonitor, RoundPoller};

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", cfg.db_path))?
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database ready at {}", cfg.db_path);

    let gateway: Arc<dyn Gateway> = Arc::new(SqliteGateway::new(pool));
    let source: Arc<dyn SnapshotSource> = Arc::new(HttpSnapshotSource::new(&cfg)?);
    let health = Arc::new(HealthState::new());
    let latency = Arc::new(LatencyStats::new());

    info!(
        "Tracking rounds from {} every {:?} (health every {:?}, aggregate every {:?}, refs: {})",
        cfg.source_url,
        cfg.poll_interval,
        cfg.health_check_interval,
        cfg.aggregate_interval,
        cfg.reference_symbols.join(","),
    );

    // --- Spawn tasks ---

    // Poll loop: fetch, reconcile, persist
    let poller = RoundPoller::new(
        Arc::clone(&source),
        Arc::clone(&gateway),
        Arc::clone(&health),
        Arc::clone(&latency),
        cfg.fetch_timeout,
        cfg.persist_timeout,
    );
    let poll_interval = cfg.poll_interval;
    tokio::spawn(async move { poller.run(poll_interval).await });

    // Health monitor: gates the poll loop
    let monitor = HealthMonitor::new(
        Arc::clone(&gateway),
        Arc::clone(&source),
        Arc::clone(&health),
        cfg.health_check_interval,
        cfg.persist_timeout,
    );
    tokio::spawn(async move { monitor.run().await });

    // Aggregate rebuild
    let aggregator = StatsAggregator::new(
        Arc::clone(&gateway),
        cfg.aggregate_interval,
        cfg.persist_timeout,
    );
    tokio::spawn(async move { aggregator.run().await });

    // HTTP API server
    let api_state = ApiState {
        gateway,
        health,
        latency,
        bet_amount: cfg.bet_amount,
        persist_timeout: cfg.persist_timeout,
    };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
