// =============================================================================
// Shared types used across the candlesync engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// Candle granularity. Sub-minute periods are intentionally unsupported.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub enum Period {
    OneMinute,
    OneHour,
    OneDay,
}

impl Period {
    /// All supported periods, finest first.
    pub const ALL: [Period; 3] = [Period::OneMinute, Period::OneHour, Period::OneDay];

    /// Fixed duration of one candle bucket in milliseconds.
    pub fn duration_ms(self) -> i64 {
        match self {
            Self::OneMinute => 60_000,
            Self::OneHour => 3_600_000,
            Self::OneDay => 86_400_000,
        }
    }

    /// Wire/URL representation ("1m", "1h", "1d").
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OneMinute => "1m",
            Self::OneHour => "1h",
            Self::OneDay => "1d",
        }
    }
}

impl std::str::FromStr for Period {
    type Err = crate::error::SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(Self::OneMinute),
            "1h" => Ok(Self::OneHour),
            "1d" => Ok(Self::OneDay),
            other => Err(crate::error::SyncError::Configuration(format!(
                "unknown period '{other}'"
            ))),
        }
    }
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single OHLCV candle. `timestamp` is the bucket-aligned open time in
/// milliseconds and serves as the natural key within a series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Composite key that identifies one candle series within the configured
/// exchange.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct SeriesKey {
    pub pair: String,
    pub period: Period,
}

impl SeriesKey {
    pub fn new(pair: impl Into<String>, period: Period) -> Self {
        Self {
            pair: pair.into(),
            period,
        }
    }
}

impl std::fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.pair, self.period)
    }
}

/// Lifecycle state of a per-series buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BufferState {
    Empty,
    Bootstrapping,
    Ready,
    Failed,
}

impl Default for BufferState {
    fn default() -> Self {
        Self::Empty
    }
}

impl std::fmt::Display for BufferState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "Empty"),
            Self::Bootstrapping => write!(f, "Bootstrapping"),
            Self::Ready => write!(f, "Ready"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}
