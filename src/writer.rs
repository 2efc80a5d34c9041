// =============================================================================
// MultiSinkWriter — batched candle replication to N stores
// =============================================================================
//
// Pulls candles newer than each sink's cursor from an upstream source and
// pushes them into every configured store. Each sink keeps its own cursor, so
// a lagging or failing sink never holds the others back: a failed write
// leaves that sink's cursor where it was and the same batch is retried on the
// next cycle.
//
// Batches are chunked per the sink's declared limit; `write_batch` inside the
// driver then selects the single- or multi-record operation by chunk size.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::query::QueryService;
use crate::store::CandleStore;
use crate::types::{Candle, Period, SeriesKey};

/// Upstream the writer replicates from. Implemented by [`QueryService`];
/// tests substitute a fixed source.
pub trait CandleSource: Send + Sync {
    /// Candles with `timestamp > from_ts`, ascending.
    fn get_range(&self, pair: &str, period: Period, from_ts: i64) -> Vec<Candle>;
}

impl CandleSource for QueryService {
    fn get_range(&self, pair: &str, period: Period, from_ts: i64) -> Vec<Candle> {
        QueryService::get_range(self, pair, period, from_ts)
    }
}

struct Sink {
    store: Arc<dyn CandleStore>,
    /// Last successfully written timestamp per series; seeded from the store
    /// on first use.
    cursors: RwLock<HashMap<SeriesKey, i64>>,
}

pub struct MultiSinkWriter {
    source: Arc<dyn CandleSource>,
    pairs: Vec<String>,
    sinks: Vec<Sink>,
    /// Per-period throttle for the run loop.
    last_cycle: RwLock<HashMap<Period, i64>>,
}

impl MultiSinkWriter {
    pub fn new(
        source: Arc<dyn CandleSource>,
        pairs: Vec<String>,
        stores: Vec<Arc<dyn CandleStore>>,
    ) -> Self {
        Self {
            source,
            pairs,
            sinks: stores
                .into_iter()
                .map(|store| Sink {
                    store,
                    cursors: RwLock::new(HashMap::new()),
                })
                .collect(),
            last_cycle: RwLock::new(HashMap::new()),
        }
    }

    /// Replication loop: each period is replicated once per period duration.
    pub async fn run(self: Arc<Self>) {
        info!(sinks = self.sinks.len(), pairs = self.pairs.len(), "writer loop starting");
        loop {
            let now = chrono::Utc::now().timestamp_millis();
            for period in Period::ALL {
                let due = {
                    let cycles = self.last_cycle.read();
                    cycles.get(&period).map_or(true, |last| last + period.duration_ms() < now)
                };
                if due {
                    self.replicate_period(period).await;
                    self.last_cycle.write().insert(period, now);
                }
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    /// Replicate every (pair, sink) combination for one period.
    pub async fn replicate_period(&self, period: Period) {
        for pair in &self.pairs {
            for sink in &self.sinks {
                self.replicate_series(sink, pair, period).await;
            }
        }
    }

    async fn replicate_series(&self, sink: &Sink, pair: &str, period: Period) {
        let key = SeriesKey::new(pair, period);
        // A failure leaves the cursor where it was; the same batch is retried
        // on the next cycle without blocking the other sinks.
        if let Err(e) = self.try_replicate(sink, &key).await {
            warn!(sink = sink.store.name(), %key, error = %e, "sink replication failed");
        }
    }

    async fn try_replicate(&self, sink: &Sink, key: &SeriesKey) -> Result<(), SyncError> {
        let cursor = self.sink_cursor(sink, key).await?;

        let pending = self.source.get_range(&key.pair, key.period, cursor);
        if pending.is_empty() {
            return Ok(());
        }

        let chunk_size = sink.store.batch_limit().unwrap_or(pending.len());
        for chunk in pending.chunks(chunk_size.max(1)) {
            sink.store
                .write_batch(&key.pair, key.period, chunk)
                .await
                .map_err(SyncError::Persistence)?;
            let last = chunk.last().expect("chunks are non-empty").timestamp;
            sink.cursors.write().insert(key.clone(), last);
            debug!(sink = sink.store.name(), %key, cursor = last, "sink cursor advanced");
        }
        Ok(())
    }

    /// Current cursor for a sink/series, seeding from the store's last
    /// persisted timestamp on first use.
    async fn sink_cursor(&self, sink: &Sink, key: &SeriesKey) -> Result<i64, SyncError> {
        if let Some(cursor) = sink.cursors.read().get(key) {
            return Ok(*cursor);
        }
        let last = sink
            .store
            .get_last_timestamp(&key.pair, key.period)
            .await
            .map_err(SyncError::Persistence)?;
        sink.cursors.write().insert(key.clone(), last);
        Ok(last)
    }

    /// Cursor value for a sink/series.
    #[cfg(test)]
    pub fn cursor(&self, sink_index: usize, pair: &str, period: Period) -> Option<i64> {
        self.sinks.get(sink_index).and_then(|sink| {
            sink.cursors
                .read()
                .get(&SeriesKey::new(pair, period))
                .copied()
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
