// =============================================================================
// QueryService — read-only facade over the sync engine's buffers
// =============================================================================
//
// Every accessor degrades to an empty result: unknown pair, unknown period,
// or a buffer that has not reached Ready all answer with nothing rather than
// an error. Callers that need to distinguish "no data yet" from "empty range"
// must consult buffer state out of band.
// =============================================================================

use std::sync::Arc;

use serde::Serialize;

use crate::sync_engine::SyncEngine;
use crate::types::{Candle, Period};

/// Timestamp + close projection of a candle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClosePoint {
    pub timestamp: i64,
    pub close: f64,
}

impl From<&Candle> for ClosePoint {
    fn from(candle: &Candle) -> Self {
        Self {
            timestamp: candle.timestamp,
            close: candle.close,
        }
    }
}

pub struct QueryService {
    engine: Arc<SyncEngine>,
}

impl QueryService {
    pub fn new(engine: Arc<SyncEngine>) -> Self {
        Self { engine }
    }

    /// Candles with `timestamp > from_ts`, ascending; empty for unknown keys
    /// and non-Ready buffers.
    pub fn get_range(&self, pair: &str, period: Period, from_ts: i64) -> Vec<Candle> {
        self.engine
            .buffer(pair, period)
            .map_or_else(Vec::new, |buf| buf.get_range(from_ts))
    }

    /// Timestamp + close for candles with `timestamp > from_ts`.
    pub fn get_close_range(&self, pair: &str, period: Period, from_ts: i64) -> Vec<ClosePoint> {
        self.get_range(pair, period, from_ts)
            .iter()
            .map(ClosePoint::from)
            .collect()
    }

    /// Close of the most recent candle, if the buffer is Ready and non-empty.
    pub fn get_latest_close(&self, pair: &str, period: Period) -> Option<ClosePoint> {
        self.engine
            .buffer(pair, period)
            .and_then(|buf| buf.get_latest())
            .map(|c| ClosePoint::from(&c))
    }
}

// =============================================================================
// Tests
// =============================================================================
