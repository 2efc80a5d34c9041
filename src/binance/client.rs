// =============================================================================
// BinanceFeed — public klines over the Binance REST API
// =============================================================================
//
// Only public market-data endpoints are used; no API key or request signing
// is required. Every request passes through the shared rate limiter before it
// leaves the process, and the HTTP client carries a 10 s timeout so a hung
// request surfaces as a transient fetch error instead of stalling a sync
// task indefinitely.
// =============================================================================

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

use super::rate_limit::RateLimiter;
use crate::feed::ExchangeFeed;
use crate::types::{Candle, Period};

/// Maximum candles Binance returns per klines request.
const KLINES_PAGE_LIMIT: u32 = 1000;

pub struct BinanceFeed {
    base_url: String,
    client: reqwest::Client,
    limiter: Arc<RateLimiter>,
}

impl BinanceFeed {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        Self {
            base_url: "https://api.binance.com".to_string(),
            client,
            limiter,
        }
    }

    /// "BTC/USDT" -> "BTCUSDT".
    fn symbol_from_pair(pair: &str) -> String {
        pair.replace('/', "").to_uppercase()
    }

    /// Parse a JSON value that may be either a string or a number into `f64`.
    /// Binance sends numeric kline fields as JSON strings.
    fn parse_str_f64(val: &serde_json::Value) -> Result<f64> {
        if let Some(s) = val.as_str() {
            s.parse::<f64>()
                .with_context(|| format!("failed to parse '{s}' as f64"))
        } else if let Some(n) = val.as_f64() {
            Ok(n)
        } else {
            anyhow::bail!("expected string or number, got: {val}")
        }
    }

    /// Parse the klines array-of-arrays response.
    ///
    /// Array indices:
    ///   [0] openTime, [1] open, [2] high, [3] low, [4] close, [5] volume
    fn parse_klines(body: &serde_json::Value) -> Result<Vec<Candle>> {
        let raw = body.as_array().context("klines response is not an array")?;

        let mut candles = Vec::with_capacity(raw.len());
        for entry in raw {
            let arr = entry.as_array().context("kline entry is not an array")?;
            if arr.len() < 6 {
                anyhow::bail!("malformed kline entry with {} elements", arr.len());
            }
            candles.push(Candle {
                timestamp: arr[0].as_i64().context("kline openTime is not an i64")?,
                open: Self::parse_str_f64(&arr[1])?,
                high: Self::parse_str_f64(&arr[2])?,
                low: Self::parse_str_f64(&arr[3])?,
                close: Self::parse_str_f64(&arr[4])?,
                volume: Self::parse_str_f64(&arr[5])?,
            });
        }
        Ok(candles)
    }
}

#[async_trait]
impl ExchangeFeed for BinanceFeed {
    fn exchange_name(&self) -> &str {
        "binance"
    }

    async fn fetch_candles(&self, pair: &str, period: Period, from_ts: i64) -> Result<Vec<Candle>> {
        self.limiter.acquire().await;

        let symbol = Self::symbol_from_pair(pair);
        let url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&startTime={}&limit={}",
            self.base_url,
            symbol,
            period.as_str(),
            from_ts,
            KLINES_PAGE_LIMIT
        );

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("GET /api/v3/klines request failed")?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse klines response")?;

        if !status.is_success() {
            anyhow::bail!("Binance GET /api/v3/klines returned {status}: {body}");
        }

        let candles = Self::parse_klines(&body)?;
        debug!(pair, period = %period, from_ts, count = candles.len(), "klines fetched");
        Ok(candles)
    }
}

impl std::fmt::Debug for BinanceFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceFeed")
            .field("base_url", &self.base_url)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
