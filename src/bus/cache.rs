//! Key-value cache capability (spec §4.5, §6): TTL'd, idempotent-by-key
//! writes for `ohlcv:<symbol>:<timeframe>` and `indicators:<symbol>:<timeframe>`.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::BusError;

pub const DEFAULT_TTL: Duration = Duration::from_secs(86_400);

#[async_trait]
pub trait Cache: Send + Sync {
    async fn set(&self, key: &str, value: serde_json::Value, ttl: Duration) -> Result<(), BusError>;
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, BusError>;
}

struct Entry {
    value: serde_json::Value,
    expires_at: Instant,
}

/// In-memory cache standing in for Redis (spec §9 "Broker SDK as capability"
/// pattern applied to the cache layer too).
#[derive(Default)]
pub struct InMemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn set(&self, key: &str, value: serde_json::Value, ttl: Duration) -> Result<(), BusError> {
        self.entries.lock().insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, BusError> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }
}

pub fn ohlcv_key(symbol: &str, timeframe: &str) -> String {
    format!("ohlcv:{symbol}:{timeframe}")
}

pub fn indicators_key(symbol: &str, timeframe: &str) -> String {
    format!("indicators:{symbol}:{timeframe}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_returns_the_same_value() {
        let cache = InMemoryCache::new();
        cache.set("k", serde_json::json!({"a": 1}), DEFAULT_TTL).await.unwrap();
        let v = cache.get("k").await.unwrap();
        assert_eq!(v, Some(serde_json::json!({"a": 1})));
    }

    #[tokio::test]
    async fn write_replaces_prior_value_idempotently_by_key() {
        let cache = InMemoryCache::new();
        cache.set("k", serde_json::json!(1), DEFAULT_TTL).await.unwrap();
        cache.set("k", serde_json::json!(2), DEFAULT_TTL).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(serde_json::json!(2)));
    }

    #[tokio::test]
    async fn expired_entry_returns_none() {
        let cache = InMemoryCache::new();
        cache.set("k", serde_json::json!(1), Duration::from_millis(0)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[test]
    fn key_builders_match_spec_format() {
        assert_eq!(ohlcv_key("SBIN-EQ", "5min"), "ohlcv:SBIN-EQ:5min");
        assert_eq!(indicators_key("SBIN-EQ", "5min"), "indicators:SBIN-EQ:5min");
    }
}
