// =============================================================================
// Central Application State
// =============================================================================
//
// Ties the long-lived subsystems together for the HTTP layer. Subsystems
// manage their own interior mutability; AppState only holds Arc references
// and a few request-time accessors.
// =============================================================================

use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;

use crate::binance::RateLimiter;
use crate::query::QueryService;
use crate::runtime_config::RuntimeConfig;
use crate::sync_engine::SyncEngine;

/// Shared across all async tasks via `Arc<AppState>`.
pub struct AppState {
    pub runtime_config: Arc<RwLock<RuntimeConfig>>,
    pub engine: Arc<SyncEngine>,
    pub query: Arc<QueryService>,
    pub limiter: Arc<RateLimiter>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        runtime_config: Arc<RwLock<RuntimeConfig>>,
        engine: Arc<SyncEngine>,
        query: Arc<QueryService>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            runtime_config,
            engine,
            query,
            limiter,
            start_time: Instant::now(),
        }
    }

    pub fn exchange(&self) -> String {
        self.engine.exchange().to_string()
    }

    /// Pair used when a query omits `?pair=`: the first configured pair.
    pub fn default_pair(&self) -> String {
        self.runtime_config
            .read()
            .pairs
            .first()
            .cloned()
            .unwrap_or_default()
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
