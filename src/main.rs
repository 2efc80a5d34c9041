// =============================================================================
// candlesync — Main Entry Point
// =============================================================================
//
// Wiring order matters: the exchange feed and every sink are resolved from
// configuration before any task starts, so an unknown exchange or sink kind
// aborts startup instead of surfacing mid-sync.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod binance;
mod error;
mod feed;
mod market_data;
mod query;
mod runtime_config;
mod scheduler;
mod store;
mod sync_engine;
mod types;
mod writer;

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::binance::RateLimiter;
use crate::query::QueryService;
use crate::runtime_config::RuntimeConfig;
use crate::scheduler::Scheduler;
use crate::store::CandleStore;
use crate::sync_engine::{SyncEngine, SyncSettings};
use crate::writer::MultiSinkWriter;

const CONFIG_PATH: &str = "runtime_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut config = RuntimeConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        RuntimeConfig::default()
    });

    // Override pairs and bind address from env if available.
    if let Ok(pairs) = std::env::var("CANDLESYNC_PAIRS") {
        config.pairs = pairs
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
    }
    if let Ok(addr) = std::env::var("CANDLESYNC_BIND_ADDR") {
        config.bind_addr = addr;
    }

    config.validate()?;
    info!(exchange = %config.exchange, pairs = ?config.pairs, "Configured series");

    // ── 2. Resolve feed and sinks from the registries ────────────────────
    let limiter = Arc::new(RateLimiter::new(
        config.rate_limit_capacity,
        config.rate_limit_refill_per_sec,
    ));
    let exchange_feed = feed::build_feed(&config.exchange, limiter.clone())?;

    let sinks: Vec<Arc<dyn CandleStore>> = config
        .sinks
        .iter()
        .map(store::build_store)
        .collect::<Result<_, _>>()?;
    info!(
        sinks = ?sinks.iter().map(|s| s.name().to_string()).collect::<Vec<_>>(),
        "Persistence sinks resolved"
    );

    // ── 3. Build the engine and shared state ─────────────────────────────
    let settings = SyncSettings {
        history_period: config.history_period,
        cleanup_period: config.cleanup_period,
        max_fetch_retries: config.max_fetch_retries,
        ..SyncSettings::default()
    };
    // The first sink doubles as the bootstrap-read store.
    let engine = Arc::new(SyncEngine::new(
        config.exchange.clone(),
        &config.pairs,
        exchange_feed,
        sinks[0].clone(),
        settings,
    ));
    let query = Arc::new(QueryService::new(engine.clone()));

    let writer_enabled = config.writer_enabled;
    let pairs = config.pairs.clone();
    let bind_addr = config.bind_addr.clone();
    let runtime_config = Arc::new(RwLock::new(config));
    let state = Arc::new(AppState::new(
        runtime_config.clone(),
        engine.clone(),
        query.clone(),
        limiter,
    ));

    // ── 4. Initial synchronization pass ──────────────────────────────────
    for key in engine.keys() {
        let engine = engine.clone();
        tokio::spawn(async move {
            engine.synchronize(&key).await;
        });
    }
    info!(series = engine.tracked(), "Initial synchronization launched");

    // ── 5. Scheduler loops ───────────────────────────────────────────────
    let _scheduler_handles = Scheduler::new(engine.clone()).spawn();

    // ── 6. Multi-sink writer loop ────────────────────────────────────────
    if writer_enabled {
        let writer = Arc::new(MultiSinkWriter::new(query.clone(), pairs, sinks));
        tokio::spawn(writer.run());
    } else {
        info!("Writer disabled by configuration");
    }

    // ── 7. Start the API server ──────────────────────────────────────────
    let api_state = state.clone();
    let api_addr = bind_addr.clone();
    tokio::spawn(async move {
        let app = api::rest::router(api_state);
        let listener = tokio::net::TcpListener::bind(&api_addr)
            .await
            .expect("Failed to bind API server");
        info!(addr = %api_addr, "API server listening");
        axum::serve(listener, app)
            .await
            .expect("API server failed");
    });

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 8. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received — stopping gracefully");

    if let Err(e) = runtime_config.read().save(CONFIG_PATH) {
        warn!(error = %e, "Failed to save runtime config on shutdown");
    }

    info!("candlesync shut down complete.");
    Ok(())
}
