//! Historical data API capability and backfill query logic (spec §4.2
//! Backfill, §6 "Historical data API").

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::error::BrokerError;
use crate::types::{Candle, Exchange, Timeframe};

#[derive(Debug, Clone)]
pub struct HistoricalRequest {
    pub exchange: Exchange,
    pub symboltoken: String,
    pub tradingsymbol: String,
    pub timeframe: Timeframe,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

/// Historical OHLCV data source, rate-limited to 5 requests/second per
/// broker (spec §6). Implementations: a `live` one issuing real HTTP calls
/// via `reqwest`, and an `offline` one returning canned candles for tests —
/// mirroring `offline_mode` in `original_source/angelone.py`.
#[async_trait]
pub trait HistoricalDataApi: Send + Sync {
    async fn fetch_history(&self, req: &HistoricalRequest) -> Result<Vec<Candle>, BrokerError>;
}

/// Simple token-bucket limiter: 5 requests/second (spec §6), grounded in the
/// original's `rate_limit(calls_per_second=5)` decorator.
pub struct RateLimiter {
    interval: tokio::time::Duration,
    last: tokio::sync::Mutex<tokio::time::Instant>,
}

impl RateLimiter {
    pub fn per_second(n: u32) -> Self {
        Self {
            interval: tokio::time::Duration::from_secs_f64(1.0 / n as f64),
            last: tokio::sync::Mutex::new(tokio::time::Instant::now() - tokio::time::Duration::from_secs(1)),
        }
    }

    pub async fn wait(&self) {
        let mut last = self.last.lock().await;
        let now = tokio::time::Instant::now();
        let elapsed = now.duration_since(*last);
        if elapsed < self.interval {
            tokio::time::sleep(self.interval - elapsed).await;
        }
        *last = tokio::time::Instant::now();
    }
}

/// Canned/offline implementation used by tests and `AccountMode::Offline`
/// runs (spec §9 "Broker SDK as capability").
pub struct OfflineHistoricalApi {
    pub fixed_candles: Vec<Candle>,
}

#[async_trait]
impl HistoricalDataApi for OfflineHistoricalApi {
    async fn fetch_history(&self, req: &HistoricalRequest) -> Result<Vec<Candle>, BrokerError> {
        Ok(self
            .fixed_candles
            .iter()
            .filter(|c| c.tradingsymbol == req.tradingsymbol && c.timeframe == req.timeframe && c.bucket_start >= req.from && c.bucket_start <= req.to)
            .cloned()
            .collect())
    }
}

/// `reqwest`-backed implementation. The request/response shape mirrors
/// spec §6: `{exchange, symboltoken, interval, fromdate, todate}` ->
/// `[[timestamp, open, high, low, close, volume], ...]`.
pub struct LiveHistoricalApi {
    client: reqwest::Client,
    base_url: String,
    limiter: RateLimiter,
}

impl LiveHistoricalApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            limiter: RateLimiter::per_second(5),
        }
    }
}

#[async_trait]
impl HistoricalDataApi for LiveHistoricalApi {
    async fn fetch_history(&self, req: &HistoricalRequest) -> Result<Vec<Candle>, BrokerError> {
        self.limiter.wait().await;

        let body = serde_json::json!({
            "exchange": req.exchange.to_string(),
            "symboltoken": req.symboltoken,
            "interval": req.timeframe.broker_interval(),
            "fromdate": req.from.to_rfc3339(),
            "todate": req.to.to_rfc3339(),
        });

        let resp = self
            .client
            .post(format!("{}/getCandleData", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| BrokerError::HistoricalDataFailed(e.to_string()))?;

        let rows: Vec<(i64, f64, f64, f64, f64, u64)> = resp
            .json()
            .await
            .map_err(|e| BrokerError::HistoricalDataFailed(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|(ts, o, h, l, c, v)| Candle {
                tradingsymbol: req.tradingsymbol.clone(),
                exchange: req.exchange,
                market: req.exchange.to_string(),
                timeframe: req.timeframe,
                bucket_start: DateTime::from_timestamp(ts, 0).unwrap_or_else(Utc::now),
                open: Decimal::try_from(o).unwrap_or_default(),
                high: Decimal::try_from(h).unwrap_or_default(),
                low: Decimal::try_from(l).unwrap_or_default(),
                close: Decimal::try_from(c).unwrap_or_default(),
                volume: v,
                closed: true,
                backfilled: true,
            })
            .collect())
    }
}
