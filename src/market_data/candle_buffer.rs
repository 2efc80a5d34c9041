// =============================================================================
// CandleBuffer — bounded, ordered per-series candle storage
// =============================================================================
//
// One buffer holds the candle sequence for a single (pair, period) series.
// Writers (the sync engine) merge batches in; readers (the query service)
// take ordered snapshots. Append and trim run under a single write lock so a
// reader never observes a partially merged sequence.
//
// Invariant after every operation: timestamps strictly ascending, no
// duplicates. A re-appended timestamp keeps the latest value (last write
// wins).
// =============================================================================

use parking_lot::RwLock;
use tracing::debug;

use crate::types::{BufferState, Candle};

/// Bounded candle sequence with hysteresis eviction.
///
/// `history_period` is the target retained length; `cleanup_period` is the
/// slack allowed to accumulate before eviction runs. Trimming only once the
/// slack is exceeded amortizes the cost across many small appends.
pub struct CandleBuffer {
    candles: RwLock<Vec<Candle>>,
    state: RwLock<BufferState>,
    history_period: usize,
    cleanup_period: usize,
}

impl CandleBuffer {
    pub fn new(history_period: usize, cleanup_period: usize) -> Self {
        Self {
            candles: RwLock::new(Vec::new()),
            state: RwLock::new(BufferState::Empty),
            history_period,
            cleanup_period,
        }
    }

    // -------------------------------------------------------------------------
    // State
    // -------------------------------------------------------------------------

    pub fn state(&self) -> BufferState {
        *self.state.read()
    }

    pub fn set_state(&self, state: BufferState) {
        *self.state.write() = state;
    }

    // -------------------------------------------------------------------------
    // Mutation
    // -------------------------------------------------------------------------

    /// Merge `incoming` into the buffer: sort ascending by timestamp and dedup
    /// keeping the last-seen value per timestamp.
    pub fn append(&self, incoming: Vec<Candle>) {
        if incoming.is_empty() {
            return;
        }
        let mut guard = self.candles.write();
        Self::merge(&mut guard, incoming);
    }

    /// Merge `incoming`, then evict with hysteresis, all under one write lock.
    pub fn append_and_trim(&self, incoming: Vec<Candle>) {
        if incoming.is_empty() {
            return;
        }
        let mut guard = self.candles.write();
        Self::merge(&mut guard, incoming);
        Self::evict(&mut guard, self.history_period, self.cleanup_period);
    }

    fn merge(existing: &mut Vec<Candle>, incoming: Vec<Candle>) {
        existing.extend(incoming);
        // Stable sort keeps later-appended duplicates after earlier ones, so
        // the dedup pass below implements last-write-wins.
        existing.sort_by_key(|c| c.timestamp);
        let merged = std::mem::take(existing);
        let mut out: Vec<Candle> = Vec::with_capacity(merged.len());
        for candle in merged {
            match out.last_mut() {
                Some(last) if last.timestamp == candle.timestamp => *last = candle,
                _ => out.push(candle),
            }
        }
        *existing = out;
    }

    fn evict(candles: &mut Vec<Candle>, history_period: usize, cleanup_period: usize) {
        let len = candles.len();
        if len > history_period + cleanup_period {
            let dropped = len - history_period;
            candles.drain(0..dropped);
            debug!(dropped, retained = history_period, "buffer trimmed");
        }
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Entries with `timestamp > from_ts`, in ascending order. A non-Ready
    /// buffer answers with an empty result, never an error.
    pub fn get_range(&self, from_ts: i64) -> Vec<Candle> {
        if self.state() != BufferState::Ready {
            return Vec::new();
        }
        let guard = self.candles.read();
        let start = guard.partition_point(|c| c.timestamp <= from_ts);
        guard[start..].to_vec()
    }

    /// The most recent entry, or `None` for an empty or non-Ready buffer.
    pub fn get_latest(&self) -> Option<Candle> {
        if self.state() != BufferState::Ready {
            return None;
        }
        self.candles.read().last().cloned()
    }

    // -------------------------------------------------------------------------
    // Internal accessors (used by the sync engine regardless of state)
    // -------------------------------------------------------------------------

    pub fn len(&self) -> usize {
        self.candles.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.read().is_empty()
    }

    /// Timestamp of the newest candle, ignoring buffer state.
    pub fn last_timestamp(&self) -> Option<i64> {
        self.candles.read().last().map(|c| c.timestamp)
    }

    /// Full ordered copy, ignoring buffer state.
    #[cfg(test)]
    pub fn snapshot(&self) -> Vec<Candle> {
        self.candles.read().clone()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(ts: i64, close: f64) -> Candle {
        Candle {
            timestamp: ts,
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 10.0,
        }
    }

    fn ready_buffer(history: usize, cleanup: usize) -> CandleBuffer {
        let buf = CandleBuffer::new(history, cleanup);
        buf.set_state(BufferState::Ready);
        buf
    }

    #[test]
    fn append_sorts_out_of_order_input() {
        let buf = ready_buffer(100, 10);
        buf.append(vec![candle(120_000, 3.0), candle(0, 1.0), candle(60_000, 2.0)]);
        let ts: Vec<i64> = buf.snapshot().iter().map(|c| c.timestamp).collect();
        assert_eq!(ts, vec![0, 60_000, 120_000]);
    }

    #[test]
    fn duplicate_timestamp_keeps_latest_value() {
        let buf = ready_buffer(100, 10);
        buf.append(vec![candle(0, 1.0), candle(60_000, 2.0)]);
        buf.append(vec![candle(60_000, 9.0)]);
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.get_latest().unwrap().close, 9.0);
    }

    #[test]
    fn repeat_append_is_idempotent() {
        let buf = ready_buffer(100, 10);
        let batch = vec![candle(0, 1.0), candle(60_000, 2.0), candle(120_000, 3.0)];
        buf.append(batch.clone());
        buf.append(batch);
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn strict_ordering_after_any_operation() {
        let buf = ready_buffer(5, 2);
        for i in (0..20).rev() {
            buf.append_and_trim(vec![candle(i * 60_000, i as f64)]);
        }
        let snap = buf.snapshot();
        for pair in snap.windows(2) {
            assert!(pair[0].timestamp < pair[1].timestamp);
        }
    }

    #[test]
    fn trim_uses_hysteresis_margin() {
        let buf = ready_buffer(10, 3);
        // 13 candles: len == history + cleanup, not yet over the margin.
        buf.append_and_trim(
            (0..13).map(|i| candle(i * 60_000, i as f64)).collect(),
        );
        assert_eq!(buf.len(), 13);

        // One more pushes past the margin; trim drops down to history_period.
        buf.append_and_trim(vec![candle(13 * 60_000, 13.0)]);
        assert_eq!(buf.len(), 10);
        assert_eq!(buf.snapshot()[0].timestamp, 4 * 60_000);
    }

    #[test]
    fn eviction_invariant_holds_across_appends() {
        let buf = ready_buffer(10, 3);
        for i in 0..100 {
            buf.append_and_trim(vec![candle(i * 60_000, i as f64)]);
            if buf.len() >= 10 {
                assert!(buf.len() >= 10 && buf.len() <= 13, "len = {}", buf.len());
            }
        }
    }

    #[test]
    fn get_range_is_strictly_greater_than() {
        let buf = ready_buffer(100, 10);
        buf.append((0..5).map(|i| candle(i * 60_000, i as f64)).collect());
        let range = buf.get_range(60_000);
        let ts: Vec<i64> = range.iter().map(|c| c.timestamp).collect();
        assert_eq!(ts, vec![120_000, 180_000, 240_000]);
        assert!(buf.get_range(240_000).is_empty());
    }

    #[test]
    fn non_ready_buffer_answers_empty() {
        let buf = CandleBuffer::new(100, 10);
        buf.append(vec![candle(0, 1.0)]);
        assert_eq!(buf.state(), BufferState::Empty);
        assert!(buf.get_range(-1).is_empty());
        assert!(buf.get_latest().is_none());

        buf.set_state(BufferState::Ready);
        assert_eq!(buf.get_range(-1).len(), 1);
        assert!(buf.get_latest().is_some());
    }
}
