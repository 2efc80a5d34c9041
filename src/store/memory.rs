// =============================================================================
// MemoryStore — in-process CandleStore driver
// =============================================================================
//
// Keeps every series in a BTreeMap keyed by timestamp, which gives ordered
// range scans and last-write-wins on duplicate timestamps for free. Used as a
// demo sink and as the reference driver in tests.
// =============================================================================

use std::collections::{BTreeMap, HashMap};

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;

use super::CandleStore;
use crate::types::{Candle, Period};

pub struct MemoryStore {
    name: String,
    series: RwLock<HashMap<(String, Period), BTreeMap<i64, Candle>>>,
}

impl MemoryStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            series: RwLock::new(HashMap::new()),
        }
    }

    /// Number of candles stored for a series.
    pub fn count(&self, pair: &str, period: Period) -> usize {
        self.series
            .read()
            .get(&(pair.to_string(), period))
            .map_or(0, BTreeMap::len)
    }
}

#[async_trait]
impl CandleStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_range(
        &self,
        pair: &str,
        period: Period,
        from_ts: Option<i64>,
    ) -> Result<Vec<Candle>> {
        let guard = self.series.read();
        let Some(map) = guard.get(&(pair.to_string(), period)) else {
            return Ok(Vec::new());
        };
        let candles = match from_ts {
            Some(ts) => map.range(ts..).map(|(_, c)| c.clone()).collect(),
            None => map.values().cloned().collect(),
        };
        Ok(candles)
    }

    async fn get_last_timestamp(&self, pair: &str, period: Period) -> Result<i64> {
        let guard = self.series.read();
        Ok(guard
            .get(&(pair.to_string(), period))
            .and_then(|map| map.keys().next_back().copied())
            .unwrap_or(0))
    }

    async fn write_single(&self, pair: &str, period: Period, candle: &Candle) -> Result<()> {
        let mut guard = self.series.write();
        guard
            .entry((pair.to_string(), period))
            .or_default()
            .insert(candle.timestamp, candle.clone());
        Ok(())
    }

    async fn write_multiple(&self, pair: &str, period: Period, candles: &[Candle]) -> Result<()> {
        let mut guard = self.series.write();
        let map = guard.entry((pair.to_string(), period)).or_default();
        for candle in candles {
            map.insert(candle.timestamp, candle.clone());
        }
        Ok(())
    }
}
