// =============================================================================
// Runtime Configuration — Hot-reloadable engine settings with atomic save
// =============================================================================
//
// Central configuration hub for the FlexiTrade pipeline. Every tunable
// parameter lives here so that the engine can be reconfigured at runtime
// without a restart.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash. All fields carry `#[serde(default)]` so that adding new fields
// never breaks loading an older config file.
//
// =============================================================================

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::{AccountMode, TradingMode};

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_symbols() -> Vec<String> {
    vec!["SBIN-EQ".to_string(), "RELIANCE-EQ".to_string(), "TCS-EQ".to_string()]
}

fn default_strategy_dir() -> PathBuf {
    PathBuf::from("strategies")
}

fn default_decoder_workers() -> usize {
    2
}

fn default_aggregator_workers() -> usize {
    4
}

fn default_rule_engine_workers() -> usize {
    4
}

fn default_lookback_candles() -> usize {
    60
}

fn default_reconnect_base_ms() -> u64 {
    500
}

fn default_reconnect_cap_ms() -> u64 {
    30_000
}

fn default_flush_grace_secs() -> u64 {
    2
}

fn default_tick_bus_topic() -> String {
    "ticks".to_string()
}

fn default_candle_bus_topic() -> String {
    "candles".to_string()
}

fn default_signal_bus_topic() -> String {
    "signals".to_string()
}

fn default_cache_ttl_secs() -> u64 {
    86_400
}

fn default_shutdown_deadline_secs() -> u64 {
    5
}

fn default_market_tz() -> String {
    "Asia/Kolkata".to_string()
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level runtime configuration for the FlexiTrade pipeline.
///
/// Every field has a serde default so that older JSON files missing new
/// fields will still deserialise correctly (spec §6 "Config").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    // --- Operational modes ---------------------------------------------------
    /// Current trading mode: Live, Paused, or Killed.
    #[serde(default)]
    pub trading_mode: TradingMode,

    /// Whether the broker/historical-data capability is backed by the real
    /// wire protocol or an offline mock.
    #[serde(default)]
    pub account_mode: AccountMode,

    // --- Symbols & routing ---------------------------------------------------
    /// Symbols the pipeline subscribes to and evaluates strategies against.
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    /// Number of TickDecoder workers (spec §5: one connection per worker).
    #[serde(default = "default_decoder_workers")]
    pub decoder_workers: usize,

    /// Number of Aggregator workers, symbols routed by `hash(symbol) mod N`.
    #[serde(default = "default_aggregator_workers")]
    pub aggregator_workers: usize,

    /// Number of RuleEngine workers, `(symbol, strategy)` routed the same way.
    #[serde(default = "default_rule_engine_workers")]
    pub rule_engine_workers: usize,

    /// Directory containing `*.yaml` strategy config files.
    #[serde(default = "default_strategy_dir")]
    pub strategy_dir: PathBuf,

    // --- Aggregator / bootstrap parameters -----------------------------------
    /// Number of historical candles to backfill on startup/reconnect before
    /// live aggregation begins (spec §4.2 "Bootstrap").
    #[serde(default = "default_lookback_candles")]
    pub lookback_candles: usize,

    /// Wall-clock grace period after a bucket boundary before it is flushed
    /// even without a closing tick (spec §4.2 "Flush").
    #[serde(default = "default_flush_grace_secs")]
    pub flush_grace_secs: u64,

    /// IANA timezone the exchange's trading session is defined in.
    #[serde(default = "default_market_tz")]
    pub market_timezone: String,

    // --- Decoder reconnect policy ---------------------------------------------
    #[serde(default = "default_reconnect_base_ms")]
    pub reconnect_base_ms: u64,

    #[serde(default = "default_reconnect_cap_ms")]
    pub reconnect_cap_ms: u64,

    // --- Bus / cache endpoints -------------------------------------------------
    #[serde(default = "default_tick_bus_topic")]
    pub tick_bus_topic: String,

    #[serde(default = "default_candle_bus_topic")]
    pub candle_bus_topic: String,

    #[serde(default = "default_signal_bus_topic")]
    pub signal_bus_topic: String,

    #[serde(default)]
    pub kafka_bootstrap_servers: Option<String>,

    #[serde(default)]
    pub redis_url: Option<String>,

    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    // --- Broker / historical API -----------------------------------------------
    #[serde(default)]
    pub broker_base_url: Option<String>,

    // --- Shutdown ----------------------------------------------------------------
    #[serde(default = "default_shutdown_deadline_secs")]
    pub shutdown_deadline_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            trading_mode: TradingMode::Paused,
            account_mode: AccountMode::Offline,
            symbols: default_symbols(),
            decoder_workers: default_decoder_workers(),
            aggregator_workers: default_aggregator_workers(),
            rule_engine_workers: default_rule_engine_workers(),
            strategy_dir: default_strategy_dir(),
            lookback_candles: default_lookback_candles(),
            flush_grace_secs: default_flush_grace_secs(),
            market_timezone: default_market_tz(),
            reconnect_base_ms: default_reconnect_base_ms(),
            reconnect_cap_ms: default_reconnect_cap_ms(),
            tick_bus_topic: default_tick_bus_topic(),
            candle_bus_topic: default_candle_bus_topic(),
            signal_bus_topic: default_signal_bus_topic(),
            kafka_bootstrap_servers: None,
            redis_url: None,
            cache_ttl_secs: default_cache_ttl_secs(),
            broker_base_url: None,
            shutdown_deadline_secs: default_shutdown_deadline_secs(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning and force `Paused` mode.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(
            path = %path.display(),
            symbols = ?config.symbols,
            trading_mode = %config.trading_mode,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    ///
    /// This prevents corruption if the process crashes mid-write.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self).context("failed to serialise runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content).with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path).with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.trading_mode, TradingMode::Paused);
        assert_eq!(cfg.account_mode, AccountMode::Offline);
        assert_eq!(cfg.symbols.len(), 3);
        assert_eq!(cfg.lookback_candles, 60);
        assert_eq!(cfg.aggregator_workers, 4);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.trading_mode, TradingMode::Paused);
        assert_eq!(cfg.account_mode, AccountMode::Offline);
        assert_eq!(cfg.lookback_candles, 60);
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "trading_mode": "Live", "symbols": ["TCS-EQ"] }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.trading_mode, TradingMode::Live);
        assert_eq!(cfg.symbols, vec!["TCS-EQ"]);
        assert_eq!(cfg.aggregator_workers, 4);
    }

    #[test]
    fn roundtrip_serialisation() {
        let cfg = RuntimeConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: RuntimeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.symbols, cfg2.symbols);
        assert_eq!(cfg.trading_mode, cfg2.trading_mode);
        assert_eq!(cfg.market_timezone, cfg2.market_timezone);
    }

    #[test]
    fn save_then_load_round_trips_through_disk() {
        let dir = std::env::temp_dir().join(format!("flexitrade-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("runtime_config.json");

        let cfg = RuntimeConfig { trading_mode: TradingMode::Live, ..RuntimeConfig::default() };
        cfg.save(&path).unwrap();
        let loaded = RuntimeConfig::load(&path).unwrap();
        assert_eq!(loaded.trading_mode, TradingMode::Live);
        assert_eq!(loaded.symbols, cfg.symbols);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
