// =============================================================================
// ExchangeFeed — live market-data source abstraction
// =============================================================================
//
// The sync engine only sees this trait. `now_ms` is part of the interface
// because convergence and truncation reason about the exchange's clock, and
// tests substitute a fixed one.
//
// Concrete feeds are resolved through `build_feed` at configuration load, so
// a typo in the exchange name fails startup instead of the first sync tick.
// =============================================================================

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::binance::{BinanceFeed, RateLimiter};
use crate::error::SyncError;
use crate::types::{Candle, Period};

#[async_trait]
pub trait ExchangeFeed: Send + Sync {
    fn exchange_name(&self) -> &str;

    /// Candles with `timestamp >= from_ts`, ascending. The batch size is
    /// exchange-defined; callers paginate until no new data arrives.
    async fn fetch_candles(&self, pair: &str, period: Period, from_ts: i64) -> Result<Vec<Candle>>;

    /// Current time in milliseconds as the feed sees it.
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Resolve an exchange identifier to a feed implementation.
pub fn build_feed(
    exchange: &str,
    limiter: Arc<RateLimiter>,
) -> Result<Arc<dyn ExchangeFeed>, SyncError> {
    match exchange {
        "binance" => Ok(Arc::new(BinanceFeed::new(limiter))),
        other => Err(SyncError::Configuration(format!(
            "unknown exchange '{other}'"
        ))),
    }
}
