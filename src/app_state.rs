// =============================================================================
// Central Application State — FlexiTrade Pipeline
// =============================================================================
//
// The single source of truth assembled once at startup and handed to every
// worker as an `Arc<AppState>` (spec §5 "globals constructed once, passed
// explicitly; no process-wide mutable singletons other than the immutable
// token->symbol map").
//
// Thread safety:
//   - Atomic counters for lock-free drop/error counts.
//   - parking_lot::Mutex guarding each Aggregator/RuleEngine worker shard.
//   - Arc<dyn Trait> capability boundaries for the bus, cache, broker, and
//     historical-data API, so tests and offline runs swap in in-memory/mock
//     implementations without touching the rest of the pipeline.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{error, info, warn};

use crate::aggregator::{Aggregator, PublishBuffer};
use crate::broker::{BrokerFeed, OfflineBroker};
use crate::bus::memory::InMemoryBus;
use crate::bus::{Cache, CandleBus, SignalBus, TickBus};
use crate::bus::cache::InMemoryCache;
use crate::decoder::SymbolMap;
use crate::historical::{HistoricalDataApi, OfflineHistoricalApi};
use crate::indicators::IndicatorEngine;
use crate::rules::{RuleEngine, StrategyConfig};
use crate::runtime_config::RuntimeConfig;
use crate::types::AccountMode;

/// Central application state shared across all async tasks via `Arc<AppState>`.
pub struct AppState {
    pub runtime_config: Arc<RwLock<RuntimeConfig>>,

    /// Immutable token->symbol map, built once at startup (spec §5).
    pub symbol_map: SymbolMap,

    // ── Durable bus + cache capability boundary ───────────────────────────
    pub tick_bus: Arc<dyn TickBus>,
    pub candle_bus: Arc<dyn CandleBus>,
    pub signal_bus: Arc<dyn SignalBus>,
    pub cache: Arc<dyn Cache>,

    // ── Broker / historical data capability boundary ──────────────────────
    pub broker: Arc<dyn BrokerFeed>,
    pub historical: Arc<dyn HistoricalDataApi>,

    // ── Aggregator worker shards, symbols routed by hash(symbol) mod N ─────
    pub aggregators: Vec<Mutex<Aggregator>>,
    pub publish_buffer: Mutex<PublishBuffer>,

    // ── Indicator computation ───────────────────────────────────────────────
    pub indicator_engine: Mutex<IndicatorEngine>,

    // ── RuleEngine worker shards, (symbol, strategy) routed the same way ───
    pub rule_engines: Vec<Mutex<RuleEngine>>,

    /// Loaded, validated strategy configs keyed by strategy name.
    pub strategies: RwLock<HashMap<String, StrategyConfig>>,

    // ── Error / drop counters (spec §7) ─────────────────────────────────────
    pub decode_drop_count: AtomicU64,
    pub backpressure_drop_count: AtomicU64,

    pub start_time: std::time::Instant,
}

impl AppState {
    /// Construct a new `AppState` from the given runtime configuration.
    ///
    /// Broker/historical capabilities are selected by `config.account_mode`;
    /// the bus and cache default to the in-memory implementation (the
    /// integration point a real deployment swaps for kafka/redis).
    pub fn new(config: RuntimeConfig) -> Self {
        let bus = Arc::new(InMemoryBus::new());
        let tick_bus: Arc<dyn TickBus> = bus.clone();
        let candle_bus: Arc<dyn CandleBus> = bus.clone();
        let signal_bus: Arc<dyn SignalBus> = bus;

        let cache: Arc<dyn Cache> = Arc::new(InMemoryCache::new());

        let (broker, historical): (Arc<dyn BrokerFeed>, Arc<dyn HistoricalDataApi>) = match config.account_mode {
            AccountMode::Offline => (Arc::new(OfflineBroker), Arc::new(OfflineHistoricalApi { fixed_candles: Vec::new() })),
            AccountMode::Live => {
                let base_url = config.broker_base_url.clone().unwrap_or_default();
                (Arc::new(OfflineBroker), Arc::new(crate::historical::LiveHistoricalApi::new(base_url)))
            }
        };

        let aggregators = (0..config.aggregator_workers.max(1)).map(|_| Mutex::new(Aggregator::new())).collect();
        let rule_engines = (0..config.rule_engine_workers.max(1)).map(|_| Mutex::new(RuleEngine::new())).collect();

        let strategies = load_strategies(&config.strategy_dir);

        // Token->symbol map: offline/dev runs use the symbol as its own
        // token; a live deployment loads the real instrument master here.
        let symbol_map = SymbolMap::new(config.symbols.iter().map(|s| (s.clone(), s.clone())));

        // Register every (symbol, strategy-timeframe) pair the IndicatorEngine
        // needs to track before any candle can be stepped through it.
        let mut indicator_engine = IndicatorEngine::new();
        for symbol in &config.symbols {
            for strategy in strategies.values() {
                indicator_engine.watch(symbol, strategy.timeframe, strategy.indicators.clone());
            }
        }

        Self {
            symbol_map,
            tick_bus,
            candle_bus,
            signal_bus,
            cache,
            broker,
            historical,
            aggregators,
            publish_buffer: Mutex::new(PublishBuffer::default()),
            indicator_engine: Mutex::new(indicator_engine),
            rule_engines,
            strategies: RwLock::new(strategies),
            decode_drop_count: AtomicU64::new(0),
            backpressure_drop_count: AtomicU64::new(0),
            start_time: std::time::Instant::now(),
            runtime_config: Arc::new(RwLock::new(config)),
        }
    }

    /// Routes a symbol onto one of the `N` Aggregator/RuleEngine worker
    /// shards (spec §5 "hash(symbol) mod N").
    pub fn shard_for(symbol: &str, shard_count: usize) -> usize {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        symbol.hash(&mut hasher);
        (hasher.finish() as usize) % shard_count.max(1)
    }

    pub fn aggregator_for(&self, symbol: &str) -> &Mutex<Aggregator> {
        &self.aggregators[Self::shard_for(symbol, self.aggregators.len())]
    }

    pub fn rule_engine_for(&self, symbol: &str) -> &Mutex<RuleEngine> {
        &self.rule_engines[Self::shard_for(symbol, self.rule_engines.len())]
    }

    pub fn record_decode_drop(&self) {
        self.decode_drop_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_backpressure_drop(&self) {
        self.backpressure_drop_count.fetch_add(1, Ordering::Relaxed);
    }
}

/// Loads every `*.yaml` strategy file in `dir`; a malformed file is logged
/// and skipped so the engine continues with the remaining valid strategies
/// (spec §6 "Strategy config files").
fn load_strategies(dir: &std::path::Path) -> HashMap<String, StrategyConfig> {
    let mut strategies = HashMap::new();

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "strategy directory not readable, starting with no strategies");
            return strategies;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
            continue;
        }
        match std::fs::read_to_string(&path).map_err(Into::into).and_then(|src| StrategyConfig::from_yaml(&src)) {
            Ok(cfg) => {
                info!(path = %path.display(), strategy = %cfg.name, "loaded strategy config");
                strategies.insert(cfg.name.clone(), cfg);
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "skipping invalid strategy config");
            }
        }
    }

    strategies
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shard_routing_is_deterministic_for_the_same_symbol() {
        let a = AppState::shard_for("SBIN-EQ", 4);
        let b = AppState::shard_for("SBIN-EQ", 4);
        assert_eq!(a, b);
        assert!(a < 4);
    }

    #[test]
    fn new_app_state_defaults_to_offline_capability() {
        let state = AppState::new(RuntimeConfig::default());
        assert_eq!(state.aggregators.len(), 4);
        assert_eq!(state.rule_engines.len(), 4);
    }
}
