// =============================================================================
// SyncEngine — per-series bootstrap and incremental synchronization
// =============================================================================
//
// One engine owns every (pair, period) series for the configured exchange.
// Each series walks the state machine
//
//   Empty -> Bootstrapping -> Ready <-> Updating -> Ready
//
// with Failed reachable from any attempt; the scheduler simply retriggers a
// Failed series on its next tick.
//
// Bootstrap seeds from the persistent store when it has data in the lookback
// window, then immediately closes the gap to the present from the exchange;
// an empty or failing store falls through to a pure exchange load.
//
// `synchronize` is single-flight per series: a trigger that arrives while a
// sync for the same key is in flight is absorbed, not queued.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::feed::ExchangeFeed;
use crate::market_data::CandleBuffer;
use crate::store::CandleStore;
use crate::types::{BufferState, Candle, Period, SeriesKey};

// =============================================================================
// Settings
// =============================================================================

/// Tunables for sync behaviour, shared by every series.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Target retained buffer length, also the bootstrap lookback multiplier
    /// (in 1-minute units, for every period).
    pub history_period: usize,
    /// Eviction hysteresis margin.
    pub cleanup_period: usize,
    /// Consecutive feed errors tolerated inside one fetch before the attempt
    /// aborts and the series moves to Failed.
    pub max_fetch_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            history_period: 1000,
            cleanup_period: 100,
            max_fetch_retries: 5,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(10),
        }
    }
}

// =============================================================================
// SyncEngine
// =============================================================================

struct SeriesSlot {
    buffer: CandleBuffer,
    /// Single-flight guard; `try_lock` failure means a sync is in flight.
    flight: tokio::sync::Mutex<()>,
}

pub struct SyncEngine {
    exchange: String,
    feed: Arc<dyn ExchangeFeed>,
    store: Arc<dyn CandleStore>,
    settings: SyncSettings,
    series: HashMap<SeriesKey, SeriesSlot>,
}

impl SyncEngine {
    /// Build the engine with one buffer per (pair, period). The tracked set
    /// is fixed at construction; pairs come from configuration.
    pub fn new(
        exchange: impl Into<String>,
        pairs: &[String],
        feed: Arc<dyn ExchangeFeed>,
        store: Arc<dyn CandleStore>,
        settings: SyncSettings,
    ) -> Self {
        let mut series = HashMap::new();
        for pair in pairs {
            for period in Period::ALL {
                series.insert(
                    SeriesKey::new(pair.clone(), period),
                    SeriesSlot {
                        buffer: CandleBuffer::new(settings.history_period, settings.cleanup_period),
                        flight: tokio::sync::Mutex::new(()),
                    },
                );
            }
        }
        Self {
            exchange: exchange.into(),
            feed,
            store,
            settings,
            series,
        }
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub fn tracked(&self) -> usize {
        self.series.len()
    }

    pub fn keys(&self) -> Vec<SeriesKey> {
        self.series.keys().cloned().collect()
    }

    pub fn keys_for(&self, period: Period) -> Vec<SeriesKey> {
        self.series
            .keys()
            .filter(|k| k.period == period)
            .cloned()
            .collect()
    }

    /// (key, state, buffered length) for every tracked series. Diagnostics
    /// for the health endpoint.
    pub fn series_overview(&self) -> Vec<(SeriesKey, BufferState, usize)> {
        self.series
            .iter()
            .map(|(key, slot)| (key.clone(), slot.buffer.state(), slot.buffer.len()))
            .collect()
    }

    /// Buffer for a series, `None` for an untracked key.
    pub fn buffer(&self, pair: &str, period: Period) -> Option<&CandleBuffer> {
        self.series
            .get(&SeriesKey::new(pair, period))
            .map(|slot| &slot.buffer)
    }

    // -------------------------------------------------------------------------
    // Synchronization entry point
    // -------------------------------------------------------------------------

    /// Bring one series up to date. Cheap to call when nothing is due; a
    /// concurrent call for the same key is absorbed by the in-flight one.
    pub async fn synchronize(&self, key: &SeriesKey) {
        let Some(slot) = self.series.get(key) else {
            warn!(%key, "synchronize requested for untracked series");
            return;
        };
        let Ok(_guard) = slot.flight.try_lock() else {
            debug!(%key, "synchronize already in flight, trigger absorbed");
            return;
        };

        let result = if slot.buffer.is_empty() {
            self.bootstrap(key, slot).await
        } else {
            self.update(key, slot).await
        };

        match result {
            Ok(()) => slot.buffer.set_state(BufferState::Ready),
            Err(e) => {
                slot.buffer.set_state(BufferState::Failed);
                warn!(%key, error = %e, "synchronize failed, series marked Failed");
            }
        }
    }

    // -------------------------------------------------------------------------
    // Bootstrap
    // -------------------------------------------------------------------------

    async fn bootstrap(&self, key: &SeriesKey, slot: &SeriesSlot) -> Result<(), SyncError> {
        slot.buffer.set_state(BufferState::Bootstrapping);

        // The lookback window always scales in 1-minute units, for every
        // period: coarser periods bootstrap a shorter candle count and
        // backfill incrementally from the store over later cycles.
        let from_ts =
            self.feed.now_ms() - Period::OneMinute.duration_ms() * self.settings.history_period as i64;

        let seeded = match self.store.get_range(&key.pair, key.period, Some(from_ts)).await {
            Ok(stored) if !stored.is_empty() => {
                info!(%key, count = stored.len(), "buffer seeded from store");
                slot.buffer.append(stored);
                true
            }
            Ok(_) => {
                debug!(%key, "store has no data in lookback window");
                false
            }
            Err(e) => {
                warn!(%key, error = %e, "store read failed, falling back to exchange");
                false
            }
        };

        if seeded {
            // Close the gap between the stored tail and the present.
            self.update(key, slot).await
        } else {
            let candles = self.fetch_from_exchange(key, from_ts).await?;
            info!(%key, count = candles.len(), "buffer bootstrapped from exchange");
            slot.buffer.append_and_trim(candles);
            Ok(())
        }
    }

    // -------------------------------------------------------------------------
    // Incremental update
    // -------------------------------------------------------------------------

    async fn update(&self, key: &SeriesKey, slot: &SeriesSlot) -> Result<(), SyncError> {
        let duration = key.period.duration_ms();
        let now = self.feed.now_ms();
        let cutoff = now - now.rem_euclid(duration);

        let Some(last) = slot.buffer.last_timestamp() else {
            return Ok(());
        };

        // At least one full closed period must be missing, otherwise no-op.
        if cutoff <= last + duration {
            return Ok(());
        }

        let new = self.fetch_from_exchange(key, last + 1).await?;
        if !new.is_empty() {
            debug!(%key, count = new.len(), "series advanced");
            slot.buffer.append_and_trim(new);
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Convergence fetch
    // -------------------------------------------------------------------------

    /// Paginate the feed from `from_ts` until an iteration yields no new
    /// timestamps, then drop the still-open current bucket.
    ///
    /// Feed errors are retried at the same `from_ts` with exponential
    /// backoff; `max_fetch_retries` consecutive errors abort the attempt.
    async fn fetch_from_exchange(
        &self,
        key: &SeriesKey,
        mut from_ts: i64,
    ) -> Result<Vec<Candle>, SyncError> {
        let mut collected: Vec<Candle> = Vec::new();
        let mut prev_from_ts: Option<i64> = None;
        let mut consecutive_errors: u32 = 0;
        let mut backoff = self.settings.initial_backoff;

        while prev_from_ts != Some(from_ts) {
            match self.feed.fetch_candles(&key.pair, key.period, from_ts).await {
                Ok(batch) => {
                    consecutive_errors = 0;
                    backoff = self.settings.initial_backoff;
                    if !batch.is_empty() {
                        collected.extend(batch);
                    }
                    prev_from_ts = Some(from_ts);
                    if let Some(last) = collected.last() {
                        from_ts = last.timestamp + 1;
                    }
                }
                Err(e) => {
                    consecutive_errors += 1;
                    if consecutive_errors >= self.settings.max_fetch_retries {
                        return Err(SyncError::TransientFetch {
                            attempts: consecutive_errors,
                            source: e,
                        });
                    }
                    warn!(
                        %key,
                        from_ts,
                        attempt = consecutive_errors,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "feed fetch failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(self.settings.max_backoff);
                }
            }
        }

        let duration = key.period.duration_ms();
        for pair in collected.windows(2) {
            if pair[1].timestamp - pair[0].timestamp != duration {
                warn!(
                    %key,
                    before = pair[0].timestamp,
                    after = pair[1].timestamp,
                    "non-contiguous candles returned by feed"
                );
                break;
            }
        }

        // Drop the still-forming bucket: only closed periods are final.
        let now = self.feed.now_ms();
        let cutoff = now - now.rem_euclid(duration);
        collected.retain(|c| c.timestamp < cutoff);

        Ok(collected)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use anyhow::Result;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    const MIN: i64 = 60_000;

    fn candle(ts: i64, close: f64) -> Candle {
        Candle {
            timestamp: ts,
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 5.0,
        }
    }

    /// Feed backed by a fixed candle set and a frozen clock.
    struct ScriptedFeed {
        candles: Mutex<Vec<Candle>>,
        now: i64,
        page_size: usize,
        calls: AtomicU32,
        /// Upcoming calls that fail before any data is returned.
        pending_failures: Mutex<u32>,
        delay: Option<Duration>,
    }

    impl ScriptedFeed {
        fn new(candles: Vec<Candle>, now: i64) -> Self {
            Self {
                candles: Mutex::new(candles),
                now,
                page_size: 1000,
                calls: AtomicU32::new(0),
                pending_failures: Mutex::new(0),
                delay: None,
            }
        }

        fn with_page_size(mut self, page_size: usize) -> Self {
            self.page_size = page_size;
            self
        }

        fn with_failures(self, n: u32) -> Self {
            *self.pending_failures.lock() = n;
            self
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ExchangeFeed for ScriptedFeed {
        fn exchange_name(&self) -> &str {
            "scripted"
        }

        async fn fetch_candles(
            &self,
            _pair: &str,
            _period: Period,
            from_ts: i64,
        ) -> Result<Vec<Candle>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            {
                let mut failures = self.pending_failures.lock();
                if *failures > 0 {
                    *failures -= 1;
                    anyhow::bail!("scripted feed failure");
                }
            }
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Ok(self
                .candles
                .lock()
                .iter()
                .filter(|c| c.timestamp >= from_ts)
                .take(self.page_size)
                .cloned()
                .collect())
        }

        fn now_ms(&self) -> i64 {
            self.now
        }
    }

    /// Store whose every operation fails.
    struct FailingStore;

    #[async_trait]
    impl CandleStore for FailingStore {
        fn name(&self) -> &str {
            "failing"
        }
        async fn get_range(
            &self,
            _pair: &str,
            _period: Period,
            _from_ts: Option<i64>,
        ) -> Result<Vec<Candle>> {
            anyhow::bail!("store down")
        }
        async fn get_last_timestamp(&self, _pair: &str, _period: Period) -> Result<i64> {
            anyhow::bail!("store down")
        }
        async fn write_single(&self, _pair: &str, _period: Period, _c: &Candle) -> Result<()> {
            anyhow::bail!("store down")
        }
        async fn write_multiple(&self, _pair: &str, _period: Period, _c: &[Candle]) -> Result<()> {
            anyhow::bail!("store down")
        }
    }

    fn settings(history: usize) -> SyncSettings {
        SyncSettings {
            history_period: history,
            cleanup_period: history / 10,
            max_fetch_retries: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        }
    }

    fn minute_key() -> SeriesKey {
        SeriesKey::new("BTC/USDT", Period::OneMinute)
    }

    fn engine(
        feed: Arc<ScriptedFeed>,
        store: Arc<dyn CandleStore>,
        history: usize,
    ) -> SyncEngine {
        SyncEngine::new(
            "scripted",
            &["BTC/USDT".to_string()],
            feed,
            store,
            settings(history),
        )
    }

    /// Ten closed 1-minute candles at k*60_000 for k = 1..=10; "now" sits
    /// exactly at the 11th bucket boundary so all ten are below the cutoff.
    fn ten_minute_series() -> (Vec<Candle>, i64) {
        let candles = (1..=10).map(|k| candle(k * MIN, k as f64)).collect();
        (candles, 11 * MIN)
    }

    #[tokio::test]
    async fn bootstrap_from_exchange_when_store_empty() {
        let (candles, now) = ten_minute_series();
        let feed = Arc::new(ScriptedFeed::new(candles, now));
        let eng = engine(feed.clone(), Arc::new(MemoryStore::new("empty")), 10);

        eng.synchronize(&minute_key()).await;

        let buf = eng.buffer("BTC/USDT", Period::OneMinute).unwrap();
        assert_eq!(buf.state(), BufferState::Ready);
        assert_eq!(buf.len(), 10);
        assert_eq!(buf.last_timestamp(), Some(10 * MIN));
    }

    #[tokio::test]
    async fn bootstrap_seeds_from_store_then_closes_gap() {
        let (candles, now) = ten_minute_series();
        let store = MemoryStore::new("seeded");
        let stored: Vec<Candle> = candles[..5].to_vec();
        store
            .write_multiple("BTC/USDT", Period::OneMinute, &stored)
            .await
            .unwrap();

        let feed = Arc::new(ScriptedFeed::new(candles, now));
        let eng = engine(feed.clone(), Arc::new(store), 10);

        eng.synchronize(&minute_key()).await;

        let buf = eng.buffer("BTC/USDT", Period::OneMinute).unwrap();
        assert_eq!(buf.state(), BufferState::Ready);
        assert_eq!(buf.len(), 10);
        // The gap (candles 6..=10) came from the feed.
        assert!(feed.calls() >= 1);
    }

    #[tokio::test]
    async fn noop_sync_issues_zero_exchange_calls() {
        let (candles, now) = ten_minute_series();
        let store = MemoryStore::new("full");
        // Store already holds everything up to the last closed bucket.
        store
            .write_multiple("BTC/USDT", Period::OneMinute, &candles)
            .await
            .unwrap();

        let feed = Arc::new(ScriptedFeed::new(candles, now));
        let eng = engine(feed.clone(), Arc::new(store), 10);

        eng.synchronize(&minute_key()).await;
        assert_eq!(feed.calls(), 0);

        // Repeat triggers stay no-ops while nothing new has closed.
        eng.synchronize(&minute_key()).await;
        assert_eq!(feed.calls(), 0);
        assert_eq!(
            eng.buffer("BTC/USDT", Period::OneMinute).unwrap().state(),
            BufferState::Ready
        );
    }

    #[tokio::test]
    async fn truncation_drops_open_bucket() {
        let (mut candles, now) = ten_minute_series();
        // The still-forming candle at the cutoff itself.
        candles.push(candle(11 * MIN, 99.0));
        let feed = Arc::new(ScriptedFeed::new(candles, now));
        let eng = engine(feed, Arc::new(MemoryStore::new("empty")), 20);

        eng.synchronize(&minute_key()).await;

        let buf = eng.buffer("BTC/USDT", Period::OneMinute).unwrap();
        let cutoff = now - now.rem_euclid(MIN);
        assert!(buf.snapshot().iter().all(|c| c.timestamp < cutoff));
        assert_eq!(buf.last_timestamp(), Some(10 * MIN));
    }

    #[tokio::test]
    async fn convergence_terminates_against_finite_feed() {
        let (candles, now) = ten_minute_series();
        let feed = Arc::new(ScriptedFeed::new(candles, now).with_page_size(3));
        let eng = engine(feed.clone(), Arc::new(MemoryStore::new("empty")), 20);

        eng.synchronize(&minute_key()).await;

        let buf = eng.buffer("BTC/USDT", Period::OneMinute).unwrap();
        assert_eq!(buf.len(), 10);
        // Pages of 3,3,3,1 then one empty page confirming convergence.
        assert_eq!(feed.calls(), 5);
    }

    #[tokio::test]
    async fn bounded_retries_mark_series_failed_then_scheduler_retry_recovers() {
        let (candles, now) = ten_minute_series();
        // More failures than the retry budget: the first synchronize aborts.
        let feed = Arc::new(ScriptedFeed::new(candles, now).with_failures(3));
        let eng = engine(feed.clone(), Arc::new(MemoryStore::new("empty")), 10);

        eng.synchronize(&minute_key()).await;
        let buf = eng.buffer("BTC/USDT", Period::OneMinute).unwrap();
        assert_eq!(buf.state(), BufferState::Failed);
        assert_eq!(feed.calls(), 3);
        assert!(buf.is_empty());

        // The failure budget is exhausted; the next trigger succeeds.
        eng.synchronize(&minute_key()).await;
        assert_eq!(buf.state(), BufferState::Ready);
        assert_eq!(buf.len(), 10);
    }

    #[tokio::test]
    async fn store_failure_falls_back_to_exchange() {
        let (candles, now) = ten_minute_series();
        let feed = Arc::new(ScriptedFeed::new(candles, now));
        let eng = engine(feed, Arc::new(FailingStore), 10);

        eng.synchronize(&minute_key()).await;

        let buf = eng.buffer("BTC/USDT", Period::OneMinute).unwrap();
        assert_eq!(buf.state(), BufferState::Ready);
        assert_eq!(buf.len(), 10);
    }

    #[tokio::test]
    async fn concurrent_trigger_is_absorbed() {
        let (candles, now) = ten_minute_series();
        let feed = Arc::new(
            ScriptedFeed::new(candles, now).with_delay(Duration::from_millis(30)),
        );
        let eng = Arc::new(engine(feed.clone(), Arc::new(MemoryStore::new("empty")), 10));

        let a = {
            let eng = eng.clone();
            tokio::spawn(async move { eng.synchronize(&minute_key()).await })
        };
        let b = {
            let eng = eng.clone();
            tokio::spawn(async move { eng.synchronize(&minute_key()).await })
        };
        a.await.unwrap();
        b.await.unwrap();

        // One data page plus the empty convergence page: exactly one sync ran.
        assert_eq!(feed.calls(), 2);
        assert_eq!(
            eng.buffer("BTC/USDT", Period::OneMinute).unwrap().len(),
            10
        );
    }

    #[tokio::test]
    async fn untracked_key_is_ignored() {
        let (candles, now) = ten_minute_series();
        let feed = Arc::new(ScriptedFeed::new(candles, now));
        let eng = engine(feed.clone(), Arc::new(MemoryStore::new("empty")), 10);

        eng.synchronize(&SeriesKey::new("DOGE/USDT", Period::OneMinute))
            .await;
        assert_eq!(feed.calls(), 0);
        assert!(eng.buffer("DOGE/USDT", Period::OneMinute).is_none());
    }

    #[test]
    fn engine_tracks_every_pair_period_combination() {
        let feed = Arc::new(ScriptedFeed::new(Vec::new(), 0));
        let eng = SyncEngine::new(
            "scripted",
            &["BTC/USDT".to_string(), "ETH/USDT".to_string()],
            feed,
            Arc::new(MemoryStore::new("empty")),
            settings(10),
        );
        assert_eq!(eng.tracked(), 6);
        assert_eq!(eng.keys_for(Period::OneHour).len(), 2);
    }
}
