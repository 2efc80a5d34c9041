// =============================================================================
// CandleStore — persistent backend abstraction
// =============================================================================
//
// The engine reads its bootstrap window from a store and the multi-sink
// writer replicates into one or more stores. Drivers implement single- and
// multi-record writes separately; `write_batch` dispatches between them by
// batch size. Stores with a hard per-commit record limit advertise it via
// `batch_limit` so the writer can chunk accordingly.
// =============================================================================

pub mod jsonl;
pub mod memory;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::error::SyncError;
use crate::runtime_config::SinkConfig;
use crate::types::{Candle, Period};

pub use jsonl::JsonFileStore;
pub use memory::MemoryStore;

#[async_trait]
pub trait CandleStore: Send + Sync {
    /// Identifier used in logs and cursor diagnostics.
    fn name(&self) -> &str;

    /// Hard per-write-batch record limit, if the backend imposes one.
    fn batch_limit(&self) -> Option<usize> {
        None
    }

    /// Candles with `timestamp >= from_ts` (all candles when `None`), in
    /// ascending order.
    async fn get_range(
        &self,
        pair: &str,
        period: Period,
        from_ts: Option<i64>,
    ) -> Result<Vec<Candle>>;

    /// Timestamp of the newest stored candle, 0 if the series is absent.
    async fn get_last_timestamp(&self, pair: &str, period: Period) -> Result<i64>;

    async fn write_single(&self, pair: &str, period: Period, candle: &Candle) -> Result<()>;

    async fn write_multiple(&self, pair: &str, period: Period, candles: &[Candle]) -> Result<()>;

    /// Write a batch, selecting the single- or multi-record operation by
    /// batch size. An empty batch is a no-op.
    async fn write_batch(&self, pair: &str, period: Period, candles: &[Candle]) -> Result<()> {
        match candles.len() {
            0 => Ok(()),
            1 => self.write_single(pair, period, &candles[0]).await,
            _ => self.write_multiple(pair, period, candles).await,
        }
    }
}

/// Build a store driver from its configuration entry.
///
/// Sink kinds are resolved here, once, at configuration load — an unknown
/// kind fails startup instead of surfacing later inside the writer loop.
pub fn build_store(config: &SinkConfig) -> Result<Arc<dyn CandleStore>, SyncError> {
    match config.kind.as_str() {
        "memory" => Ok(Arc::new(MemoryStore::new("memory"))),
        "jsonl" => {
            let dir = config.path.clone().ok_or_else(|| {
                SyncError::Configuration("jsonl sink requires a 'path'".to_string())
            })?;
            Ok(Arc::new(JsonFileStore::new(dir)))
        }
        other => Err(SyncError::Configuration(format!(
            "unknown sink kind '{other}'"
        ))),
    }
}
