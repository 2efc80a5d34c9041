// =============================================================================
// Scheduler — periodic sync triggers per tracked series
// =============================================================================
//
// One polling loop per period granularity. The cadence is deliberately much
// finer than the period itself (minute series are checked every second) so a
// freshly closed bucket is picked up promptly; `synchronize` no-ops cheaply
// when nothing is due and absorbs overlapping triggers itself, so ticks are
// never skipped here.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::info;

use crate::sync_engine::SyncEngine;
use crate::types::Period;

/// Polling cadence for a period: proportional to, but much finer than, the
/// period granularity.
pub fn poll_interval(period: Period) -> Duration {
    match period {
        Period::OneMinute => Duration::from_secs(1),
        Period::OneHour => Duration::from_secs(60),
        Period::OneDay => Duration::from_secs(3600),
    }
}

pub struct Scheduler {
    engine: Arc<SyncEngine>,
}

impl Scheduler {
    pub fn new(engine: Arc<SyncEngine>) -> Self {
        Self { engine }
    }

    /// Spawn one polling loop per period. Returns the task handles so the
    /// caller can abort them on shutdown.
    pub fn spawn(self) -> Vec<JoinHandle<()>> {
        self.spawn_with_cadence(poll_interval)
    }

    /// As [`spawn`], with an injectable cadence (tests use millisecond ticks).
    pub fn spawn_with_cadence(
        self,
        cadence: impl Fn(Period) -> Duration + Send + 'static,
    ) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(Period::ALL.len());
        for period in Period::ALL {
            let engine = self.engine.clone();
            let tick = cadence(period);
            info!(period = %period, tick_ms = tick.as_millis() as u64, "scheduler loop starting");
            handles.push(tokio::spawn(async move {
                let mut interval = tokio::time::interval(tick);
                loop {
                    interval.tick().await;
                    for key in engine.keys_for(period) {
                        let engine = engine.clone();
                        // Per-key task: a slow series never delays its peers.
                        tokio::spawn(async move {
                            engine.synchronize(&key).await;
                        });
                    }
                }
            }));
        }
        handles
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::ExchangeFeed;
    use crate::store::MemoryStore;
    use crate::sync_engine::{SyncEngine, SyncSettings};
    use crate::types::{BufferState, Candle};
    use anyhow::Result;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Frozen clock aligned to every period boundary (two full days).
    const NOW: i64 = 172_800_000;

    /// Feed that records which (pair, period) series were fetched. Serves one
    /// closed candle for minute series and nothing for the coarser ones.
    struct RecordingFeed {
        seen: Mutex<HashSet<(String, Period)>>,
        calls: AtomicU32,
        delay: Option<Duration>,
    }

    impl RecordingFeed {
        fn new() -> Self {
            Self {
                seen: Mutex::new(HashSet::new()),
                calls: AtomicU32::new(0),
                delay: None,
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        fn seen(&self, pair: &str, period: Period) -> bool {
            self.seen.lock().contains(&(pair.to_string(), period))
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ExchangeFeed for RecordingFeed {
        fn exchange_name(&self) -> &str {
            "recording"
        }

        async fn fetch_candles(
            &self,
            pair: &str,
            period: Period,
            from_ts: i64,
        ) -> Result<Vec<Candle>> {
            self.seen.lock().insert((pair.to_string(), period));
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let closed = Candle {
                timestamp: NOW - Period::OneMinute.duration_ms(),
                open: 1.0,
                high: 2.0,
                low: 0.5,
                close: 1.5,
                volume: 3.0,
            };
            if period == Period::OneMinute && closed.timestamp >= from_ts {
                Ok(vec![closed])
            } else {
                Ok(Vec::new())
            }
        }

        fn now_ms(&self) -> i64 {
            NOW
        }
    }

    fn engine(feed: Arc<RecordingFeed>, pairs: &[String]) -> Arc<SyncEngine> {
        let settings = SyncSettings {
            history_period: 5,
            cleanup_period: 1,
            ..SyncSettings::default()
        };
        Arc::new(SyncEngine::new(
            "recording",
            pairs,
            feed,
            Arc::new(MemoryStore::new("empty")),
            settings,
        ))
    }

    #[test]
    fn cadence_is_finer_than_the_period() {
        for period in Period::ALL {
            let tick_ms = poll_interval(period).as_millis() as i64;
            assert!(tick_ms < period.duration_ms());
            // Proportional: one tick per ~60 buckets of the next-finer unit.
            assert_eq!(tick_ms * 60, period.duration_ms());
        }
    }

    #[tokio::test]
    async fn ticks_trigger_every_tracked_key() {
        let pairs = vec!["BTC/USDT".to_string(), "ETH/USDT".to_string()];
        let feed = Arc::new(RecordingFeed::new());
        let eng = engine(feed.clone(), &pairs);

        let handles =
            Scheduler::new(eng.clone()).spawn_with_cadence(|_| Duration::from_millis(2));
        tokio::time::sleep(Duration::from_millis(100)).await;
        for handle in &handles {
            handle.abort();
        }

        for pair in &pairs {
            for period in Period::ALL {
                assert!(feed.seen(pair, period), "series {pair}@{period} never triggered");
            }
        }

        // Minute series got their closed candle and settled Ready.
        let buf = eng.buffer("BTC/USDT", Period::OneMinute).unwrap();
        assert_eq!(buf.state(), BufferState::Ready);
        assert_eq!(buf.len(), 1);
    }

    #[tokio::test]
    async fn overlapping_ticks_are_absorbed_while_a_sync_is_in_flight() {
        let pairs = vec!["BTC/USDT".to_string()];
        // Each fetch far outlasts the tick, so dozens of triggers arrive while
        // the first sync per key is still in flight.
        let feed = Arc::new(RecordingFeed::new().with_delay(Duration::from_millis(500)));
        let eng = engine(feed.clone(), &pairs);

        let handles =
            Scheduler::new(eng.clone()).spawn_with_cadence(|_| Duration::from_millis(1));
        tokio::time::sleep(Duration::from_millis(60)).await;
        for handle in &handles {
            handle.abort();
        }

        // Exactly one fetch entered per (pair, period) key; every other tick
        // hit the single-flight guard and was absorbed.
        assert_eq!(feed.calls(), Period::ALL.len() as u32);
    }
}
