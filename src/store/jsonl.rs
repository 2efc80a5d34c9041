// =============================================================================
// JsonFileStore — append-only JSON-lines CandleStore driver
// =============================================================================
//
// One file per (pair, period) under a root directory, one JSON candle per
// line. Appends are cheap; range reads parse the whole file, sort, and dedup
// keeping the last-written value per timestamp. The driver advertises a
// 499-record batch limit, matching document stores that cap batched commits.
// =============================================================================

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use super::CandleStore;
use crate::types::{Candle, Period};

/// Hard cap on records per batched write.
const BATCH_LIMIT: usize = 499;

pub struct JsonFileStore {
    name: String,
    root: PathBuf,
    // Serializes appends so interleaved writers cannot tear lines.
    write_guard: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            name: "jsonl".to_string(),
            root: root.into(),
            write_guard: Mutex::new(()),
        }
    }

    fn series_path(&self, pair: &str, period: Period) -> PathBuf {
        let pair_file = pair.replace('/', "-");
        self.root.join(format!("{pair_file}.{period}.jsonl"))
    }

    fn read_series(path: &Path) -> Result<Vec<Candle>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;

        let mut candles = Vec::new();
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let candle: Candle = serde_json::from_str(line)
                .with_context(|| format!("malformed candle line in {}", path.display()))?;
            candles.push(candle);
        }

        // Appends may contain rewrites of an already stored timestamp; keep
        // the last-written value, same as the in-memory buffer semantics.
        candles.sort_by_key(|c| c.timestamp);
        let raw = std::mem::take(&mut candles);
        for candle in raw {
            match candles.last_mut() {
                Some(last) if last.timestamp == candle.timestamp => *last = candle,
                _ => candles.push(candle),
            }
        }
        Ok(candles)
    }

    fn append_lines(&self, path: &Path, candles: &[Candle]) -> Result<()> {
        let _guard = self.write_guard.lock();
        std::fs::create_dir_all(&self.root)
            .with_context(|| format!("failed to create {}", self.root.display()))?;

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;

        let mut buf = String::new();
        for candle in candles {
            buf.push_str(&serde_json::to_string(candle).context("failed to serialize candle")?);
            buf.push('\n');
        }
        file.write_all(buf.as_bytes())
            .with_context(|| format!("failed to append to {}", path.display()))?;

        debug!(path = %path.display(), count = candles.len(), "candles appended");
        Ok(())
    }
}

#[async_trait]
impl CandleStore for JsonFileStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn batch_limit(&self) -> Option<usize> {
        Some(BATCH_LIMIT)
    }

    async fn get_range(
        &self,
        pair: &str,
        period: Period,
        from_ts: Option<i64>,
    ) -> Result<Vec<Candle>> {
        let mut candles = Self::read_series(&self.series_path(pair, period))?;
        if let Some(ts) = from_ts {
            candles.retain(|c| c.timestamp >= ts);
        }
        Ok(candles)
    }

    async fn get_last_timestamp(&self, pair: &str, period: Period) -> Result<i64> {
        let candles = Self::read_series(&self.series_path(pair, period))?;
        Ok(candles.last().map(|c| c.timestamp).unwrap_or(0))
    }

    async fn write_single(&self, pair: &str, period: Period, candle: &Candle) -> Result<()> {
        self.append_lines(&self.series_path(pair, period), std::slice::from_ref(candle))
    }

    async fn write_multiple(&self, pair: &str, period: Period, candles: &[Candle]) -> Result<()> {
        self.append_lines(&self.series_path(pair, period), candles)
    }
}
