//! Per-(symbol, timeframe) rolling indicator computation (spec §4.3).

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{atr, bollinger, macd, rsi, sma};
use crate::types::Candle;

/// One configured indicator, as declared in `StrategyConfig.indicators[]`
/// (spec §3). `name` is the snapshot key prefix (e.g. `rsi14`); `kind`
/// selects the math; `params` carry the periods/std/etc.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: IndicatorKind,
    #[serde(default)]
    pub params: IndicatorParams,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorKind {
    Rsi,
    BollingerBands,
    Atr,
    Sma,
    Macd,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndicatorParams {
    #[serde(default)]
    pub period: Option<usize>,
    #[serde(default)]
    pub std: Option<f64>,
    #[serde(default)]
    pub fast: Option<usize>,
    #[serde(default)]
    pub slow: Option<usize>,
    #[serde(default)]
    pub signal: Option<usize>,
}

impl IndicatorSpec {
    /// Lookback this indicator needs to produce its first value.
    pub fn lookback(&self) -> usize {
        match self.kind {
            IndicatorKind::Rsi => self.params.period.unwrap_or(14) + 1,
            IndicatorKind::BollingerBands => self.params.period.unwrap_or(20),
            IndicatorKind::Atr => self.params.period.unwrap_or(14) + 1,
            IndicatorKind::Sma => self.params.period.unwrap_or(20),
            IndicatorKind::Macd => {
                let slow = self.params.slow.unwrap_or(26);
                let signal = self.params.signal.unwrap_or(9);
                slow + signal
            }
        }
    }
}

/// Latest computed indicator values for a (symbol, timeframe), keyed by the
/// flat snapshot key (`rsi14`, `bb20_upper`, `bb20_mid`, `bb20_lower`, ...).
///
/// `partial` is set while the rolling window has fewer closed candles than
/// the largest configured lookback (spec §7: "indicator snapshot is marked
/// `partial:true` until enough closed candles exist").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub values: HashMap<String, f64>,
    pub partial: bool,
}

impl IndicatorSnapshot {
    pub fn get(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }
}

/// Per-(symbol, timeframe) rolling window + computed snapshot.
///
/// Owned by exactly one IndicatorEngine worker (spec §3 Ownership).
pub struct PairAccumulator {
    window: VecDeque<Candle>,
    max_window: usize,
    specs: Vec<IndicatorSpec>,
}

impl PairAccumulator {
    pub fn new(specs: Vec<IndicatorSpec>) -> Self {
        let max_lookback = specs.iter().map(IndicatorSpec::lookback).max().unwrap_or(0);
        let max_window = max_lookback + SAFETY_MARGIN;
        Self {
            window: VecDeque::with_capacity(max_window),
            max_window,
            specs,
        }
    }

    /// Feeds one closed candle (bootstrap or live), evicting the oldest
    /// entry once the window exceeds `max_lookback + safety` (spec §4.3
    /// Incremental step 1).
    pub fn push(&mut self, candle: Candle) {
        self.window.push_back(candle);
        while self.window.len() > self.max_window {
            self.window.pop_front();
        }
    }

    /// Recomputes every configured indicator from the current window (spec
    /// §4.3 Incremental step 2) and produces a snapshot.
    pub fn snapshot(&self) -> IndicatorSnapshot {
        let closes: Vec<f64> = self.window.iter().map(|c| dec_to_f64(c.close)).collect();
        let highs: Vec<f64> = self.window.iter().map(|c| dec_to_f64(c.high)).collect();
        let lows: Vec<f64> = self.window.iter().map(|c| dec_to_f64(c.low)).collect();

        let mut values = HashMap::new();
        let max_lookback = self.specs.iter().map(IndicatorSpec::lookback).max().unwrap_or(0);
        let partial = self.window.len() < max_lookback;

        for spec in &self.specs {
            match spec.kind {
                IndicatorKind::Rsi => {
                    let period = spec.params.period.unwrap_or(14);
                    if let Some(&v) = rsi::calculate_rsi(&closes, period).last() {
                        values.insert(spec.name.clone(), v);
                    }
                }
                IndicatorKind::BollingerBands => {
                    let period = spec.params.period.unwrap_or(20);
                    let std = spec.params.std.unwrap_or(2.0);
                    if let Some(bb) = bollinger::calculate_bollinger(&closes, period, std) {
                        values.insert(format!("{}_upper", spec.name), bb.upper);
                        values.insert(format!("{}_mid", spec.name), bb.middle);
                        values.insert(format!("{}_lower", spec.name), bb.lower);
                    }
                }
                IndicatorKind::Atr => {
                    let period = spec.params.period.unwrap_or(14);
                    if let Some(v) = atr::calculate_atr(&highs, &lows, &closes, period) {
                        values.insert(spec.name.clone(), v);
                    }
                }
                IndicatorKind::Sma => {
                    let period = spec.params.period.unwrap_or(20);
                    if let Some(v) = sma::calculate_sma(&closes, period) {
                        values.insert(spec.name.clone(), v);
                    }
                }
                IndicatorKind::Macd => {
                    let fast = spec.params.fast.unwrap_or(12);
                    let slow = spec.params.slow.unwrap_or(26);
                    let signal_period = spec.params.signal.unwrap_or(9);
                    if let Some(r) = macd::calculate_macd(&closes, fast, slow, signal_period) {
                        values.insert(format!("{}_line", spec.name), r.line);
                        values.insert(format!("{}_signal", spec.name), r.signal);
                        values.insert(format!("{}_hist", spec.name), r.hist);
                    }
                }
            }
        }

        IndicatorSnapshot { values, partial }
    }
}

const SAFETY_MARGIN: usize = 5;

fn dec_to_f64(d: rust_decimal::Decimal) -> f64 {
    use rust_decimal::prelude::ToPrimitive;
    d.to_f64().unwrap_or_else(|| {
        warn!("decimal -> f64 conversion failed, defaulting to 0.0");
        0.0
    })
}

/// Owns one `PairAccumulator` per (symbol, timeframe) watched, per spec §3
/// Ownership: "each (symbol, timeframe) is owned by exactly one
/// IndicatorEngine worker".
#[derive(Default)]
pub struct IndicatorEngine {
    pairs: HashMap<(String, crate::types::Timeframe), PairAccumulator>,
}

impl IndicatorEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn watch(&mut self, symbol: &str, timeframe: crate::types::Timeframe, specs: Vec<IndicatorSpec>) {
        self.pairs
            .entry((symbol.to_string(), timeframe))
            .or_insert_with(|| PairAccumulator::new(specs));
    }

    /// Bootstrap from historical candles, fed oldest-first (spec §4.3
    /// Bootstrap).
    pub fn bootstrap(&mut self, symbol: &str, timeframe: crate::types::Timeframe, history: impl IntoIterator<Item = Candle>) -> Option<IndicatorSnapshot> {
        let acc = self.pairs.get_mut(&(symbol.to_string(), timeframe))?;
        for candle in history {
            acc.push(candle);
        }
        Some(acc.snapshot())
    }

    /// Step one closed candle and return the refreshed snapshot (spec §4.3
    /// Incremental step).
    pub fn step(&mut self, symbol: &str, timeframe: crate::types::Timeframe, candle: Candle) -> Option<IndicatorSnapshot> {
        let acc = self.pairs.get_mut(&(symbol.to_string(), timeframe))?;
        acc.push(candle);
        Some(acc.snapshot())
    }
}
