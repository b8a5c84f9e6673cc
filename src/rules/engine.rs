//! FlexiRule evaluator (spec §4.4): per-(symbol, strategy) position state
//! machine plus weighted entry/exit rule evaluation.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::json;
use tracing::error;

use super::config::{weighted_fires, StopTargetKind, StopTargetRule, StopTargetSpec, StrategyConfig};
use crate::error::RuleEngineError;
use crate::indicators::IndicatorSnapshot;
use crate::types::{Candle, Position, PositionState, Signal, SignalKind};

/// One state transition's audit trail (spec §4.4 "Audit").
#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub symbol: String,
    pub strategy: String,
    pub bucket_start: DateTime<Utc>,
    pub reason: String,
    pub record: serde_json::Value,
}

/// Owns one `Position` per (symbol, strategy) it is responsible for (spec §3
/// Ownership): "each (symbol, strategy) is owned by exactly one RuleEngine
/// worker".
#[derive(Default)]
pub struct RuleEngine {
    positions: HashMap<(String, String), Position>,
}

impl RuleEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self, symbol: &str, strategy: &str) -> Option<&Position> {
        self.positions.get(&(symbol.to_string(), strategy.to_string()))
    }

    /// Evaluate one (candle, snapshot) tuple for a (symbol, strategy) pair.
    /// Returns the published signal (`None` for an internal HOLD) and the
    /// audit record for this transition.
    pub fn evaluate(
        &mut self,
        symbol: &str,
        config: &StrategyConfig,
        candle: &Candle,
        snapshot: &IndicatorSnapshot,
        pattern_flags: &HashMap<String, bool>,
    ) -> Result<(Option<Signal>, AuditRecord), RuleEngineError> {
        let key = (symbol.to_string(), config.name.clone());
        let ctx = build_context(candle, snapshot, pattern_flags, config);

        let existing_state = self.positions.get(&key).map(|p| p.state);

        match existing_state {
            Some(PositionState::Open) | Some(PositionState::Partial) => {
                self.evaluate_open(symbol, config, candle, &ctx)
            }
            Some(PositionState::Exited) | None => self.evaluate_flat(symbol, config, candle, &ctx),
            Some(PositionState::Flat) => self.evaluate_flat(symbol, config, candle, &ctx),
        }
    }

    fn evaluate_flat(
        &mut self,
        symbol: &str,
        config: &StrategyConfig,
        candle: &Candle,
        ctx: &HashMap<String, f64>,
    ) -> Result<(Option<Signal>, AuditRecord), RuleEngineError> {
        let key = (symbol.to_string(), config.name.clone());

        if weighted_fires(&config.entry_rules, config.threshold, ctx) {
            let position = Position {
                state: PositionState::Open,
                entry_price: candle.close,
                entry_time: candle.bucket_start,
                quantity: config.quantity,
                highest_price_since_entry: candle.close,
                lowest_price_since_entry: candle.close,
                breakeven_armed: false,
                remaining_fraction: Decimal::ONE,
            };
            self.positions.insert(key, position);

            let signal = Signal {
                symbol: symbol.to_string(),
                strategy: config.name.clone(),
                kind: SignalKind::Buy,
                price: candle.close,
                timestamp: candle.bucket_start,
                reason: "entry_rules threshold met".to_string(),
            };
            let audit = audit_record(symbol, config, candle, "BUY: entry_rules threshold met");
            return Ok((Some(signal), audit));
        }

        let audit = audit_record(symbol, config, candle, "HOLD: entry threshold not met");
        Ok((None, audit))
    }

    fn evaluate_open(
        &mut self,
        symbol: &str,
        config: &StrategyConfig,
        candle: &Candle,
        ctx: &HashMap<String, f64>,
    ) -> Result<(Option<Signal>, AuditRecord), RuleEngineError> {
        let key = (symbol.to_string(), config.name.clone());
        let close_f64 = dec_to_f64(candle.close);

        // (a) Breakeven arm check — no signal, but consumes this tick if it fires.
        if let Some(breakeven) = &config.trade_management.breakeven {
            let position = self.positions.get_mut(&key).expect("state machine guarantees a position exists");
            if !position.breakeven_armed {
                let trigger_price = position.entry_price * (Decimal::ONE + Decimal::try_from(breakeven.trigger / 100.0).unwrap_or_default());
                if candle.close >= trigger_price {
                    position.breakeven_armed = true;
                    let audit = audit_record(symbol, config, candle, "breakeven armed");
                    return Ok((None, audit));
                }
            }
        }

        let position = self.positions.get(&key).expect("state machine guarantees a position exists").clone();

        // (b) Stop-loss.
        if let Some((stop_price, rule_id)) = resolve_stop_price(&config.stop_loss, &position, close_f64) {
            let effective_stop = if position.breakeven_armed {
                stop_price.max(dec_to_f64(position.entry_price))
            } else {
                stop_price
            };
            if close_f64 <= effective_stop {
                self.exit_fully(symbol, config, candle, &rule_id, position.breakeven_armed);
                let reason = if position.breakeven_armed && stop_price < dec_to_f64(position.entry_price) {
                    format!("SELL: stop-loss {rule_id} hit, breakeven floor applied")
                } else {
                    format!("SELL: stop-loss {rule_id} hit")
                };
                let signal = Signal {
                    symbol: symbol.to_string(),
                    strategy: config.name.clone(),
                    kind: SignalKind::SellRule(rule_id),
                    price: candle.close,
                    timestamp: candle.bucket_start,
                    reason: reason.clone(),
                };
                let audit = audit_record(symbol, config, candle, &reason);
                return Ok((Some(signal), audit));
            }
        }

        // (c) Target.
        if let Some((target_price, rule_id, partial_pct)) = resolve_target(&config.target, &position, close_f64) {
            if close_f64 >= target_price {
                if let Some(pct) = partial_pct {
                    let key2 = key.clone();
                    let p = self.positions.get_mut(&key2).unwrap();
                    p.remaining_fraction *= Decimal::ONE - Decimal::try_from(pct as f64 / 100.0).unwrap_or_default();
                    p.state = PositionState::Partial;
                    let reason = format!("PARTIAL_SELL:{pct}:{rule_id}");
                    let signal = Signal {
                        symbol: symbol.to_string(),
                        strategy: config.name.clone(),
                        kind: SignalKind::PartialSell { pct, rule_id: rule_id.clone() },
                        price: candle.close,
                        timestamp: candle.bucket_start,
                        reason: reason.clone(),
                    };
                    let audit = audit_record(symbol, config, candle, &reason);
                    return Ok((Some(signal), audit));
                } else {
                    self.exit_fully(symbol, config, candle, &rule_id, false);
                    let reason = format!("SELL: target {rule_id} hit");
                    let signal = Signal {
                        symbol: symbol.to_string(),
                        strategy: config.name.clone(),
                        kind: SignalKind::SellRule(rule_id),
                        price: candle.close,
                        timestamp: candle.bucket_start,
                        reason: reason.clone(),
                    };
                    let audit = audit_record(symbol, config, candle, &reason);
                    return Ok((Some(signal), audit));
                }
            }
        }

        // (d) Exit rules (weighted).
        if weighted_fires(&config.exit_rules, config.threshold, ctx) {
            self.exit_fully(symbol, config, candle, "exit_rules", false);
            let reason = "SELL: exit_rules threshold met".to_string();
            let signal = Signal {
                symbol: symbol.to_string(),
                strategy: config.name.clone(),
                kind: SignalKind::Sell,
                price: candle.close,
                timestamp: candle.bucket_start,
                reason: reason.clone(),
            };
            let audit = audit_record(symbol, config, candle, &reason);
            return Ok((Some(signal), audit));
        }

        // (e) Update trailing high-water mark even when nothing fires, so
        // subsequent trailing stop/target evaluations see the latest extreme.
        let p = self.positions.get_mut(&key).unwrap();
        p.highest_price_since_entry = p.highest_price_since_entry.max(candle.close);
        p.lowest_price_since_entry = p.lowest_price_since_entry.min(candle.close);

        let audit = audit_record(symbol, config, candle, "HOLD: no exit condition met");
        Ok((None, audit))
    }

    fn exit_fully(&mut self, symbol: &str, config: &StrategyConfig, _candle: &Candle, _rule_id: &str, _breakeven: bool) {
        let key = (symbol.to_string(), config.name.clone());
        if let Some(p) = self.positions.get_mut(&key) {
            p.state = PositionState::Exited;
            p.remaining_fraction = Decimal::ZERO;
        }
        self.positions.remove(&key);
    }
}

fn resolve_stop_price(spec: &StopTargetSpec, position: &Position, close: f64) -> Option<(f64, String)> {
    let entry = dec_to_f64(position.entry_price);
    match spec.kind {
        StopTargetKind::Fixed => {
            let pct = parse_pct(spec.value.as_deref()?)?;
            Some((entry * (1.0 - pct), "stop_fixed".to_string()))
        }
        StopTargetKind::Trailing => {
            let pct = parse_pct(spec.value.as_deref()?)?;
            let highest = dec_to_f64(position.highest_price_since_entry).max(close);
            Some((highest * (1.0 - pct), "stop_trailing".to_string()))
        }
        StopTargetKind::Multi => spec.rules.iter().find_map(|r| stop_rule_price(r, position, close)),
    }
}

fn stop_rule_price(rule: &StopTargetRule, position: &Position, close: f64) -> Option<(f64, String)> {
    let entry = dec_to_f64(position.entry_price);
    let pct = parse_pct(rule.value.as_deref()?)?;
    let price = match rule.kind {
        StopTargetKind::Fixed => entry * (1.0 - pct),
        StopTargetKind::Trailing => dec_to_f64(position.highest_price_since_entry).max(close) * (1.0 - pct),
        StopTargetKind::Multi => return None,
    };
    if close <= price {
        Some((price, rule.id.clone()))
    } else {
        None
    }
}

fn resolve_target(spec: &StopTargetSpec, position: &Position, close: f64) -> Option<(f64, String, Option<u32>)> {
    let entry = dec_to_f64(position.entry_price);
    match spec.kind {
        StopTargetKind::Fixed => {
            let pct = parse_pct(spec.value.as_deref()?)?;
            Some((entry * (1.0 + pct), "target_fixed".to_string(), None))
        }
        StopTargetKind::Trailing => {
            let pct = parse_pct(spec.value.as_deref()?)?;
            let lowest = dec_to_f64(position.lowest_price_since_entry).min(close);
            Some((lowest * (1.0 + pct), "target_trailing".to_string(), None))
        }
        StopTargetKind::Multi => spec.rules.iter().find_map(|r| target_rule_price(r, position, close)),
    }
}

fn target_rule_price(rule: &StopTargetRule, position: &Position, close: f64) -> Option<(f64, String, Option<u32>)> {
    let entry = dec_to_f64(position.entry_price);
    let pct = parse_pct(rule.value.as_deref()?)?;
    let price = match rule.kind {
        StopTargetKind::Fixed => entry * (1.0 + pct),
        StopTargetKind::Trailing => dec_to_f64(position.lowest_price_since_entry).min(close) * (1.0 + pct),
        StopTargetKind::Multi => return None,
    };
    if close >= price {
        let partial = rule.partial_exit.as_deref().and_then(parse_pct_u32);
        Some((price, rule.id.clone(), partial))
    } else {
        None
    }
}

fn parse_pct(s: &str) -> Option<f64> {
    s.trim().strip_suffix('%')?.trim().parse::<f64>().ok().map(|v| v / 100.0)
}

fn parse_pct_u32(s: &str) -> Option<u32> {
    s.trim().strip_suffix('%')?.trim().parse::<u32>().ok()
}

fn dec_to_f64(d: Decimal) -> f64 {
    d.to_f64().unwrap_or_else(|| {
        error!("decimal -> f64 conversion failed");
        0.0
    })
}

fn build_context(candle: &Candle, snapshot: &IndicatorSnapshot, pattern_flags: &HashMap<String, bool>, config: &StrategyConfig) -> HashMap<String, f64> {
    let mut ctx: HashMap<String, f64> = HashMap::new();
    ctx.insert("open".to_string(), dec_to_f64(candle.open));
    ctx.insert("high".to_string(), dec_to_f64(candle.high));
    ctx.insert("low".to_string(), dec_to_f64(candle.low));
    ctx.insert("close".to_string(), dec_to_f64(candle.close));
    ctx.insert("volume".to_string(), candle.volume as f64);

    for (k, v) in &snapshot.values {
        ctx.insert(k.clone(), *v);
    }
    for (name, flag) in pattern_flags {
        ctx.insert(name.clone(), if *flag { 1.0 } else { 0.0 });
    }

    if let Some(market) = config.market_params.get(&candle.market) {
        for (name, expr) in market {
            if let Ok(v) = super::market_params::eval_expr(expr, &ctx) {
                ctx.insert(name.clone(), v);
            }
        }
    }

    ctx
}

fn audit_record(symbol: &str, config: &StrategyConfig, candle: &Candle, reason: &str) -> AuditRecord {
    AuditRecord {
        symbol: symbol.to_string(),
        strategy: config.name.clone(),
        bucket_start: candle.bucket_start,
        reason: reason.to_string(),
        record: json!({
            "symbol": symbol,
            "strategy": config.name,
            "bucket_start": candle.bucket_start,
            "ohlcv": {
                "open": candle.open, "high": candle.high, "low": candle.low,
                "close": candle.close, "volume": candle.volume,
            },
            "reason": reason,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Exchange, Timeframe};
    use std::collections::HashMap as StdHashMap;

    fn candle(close: f64, bucket_offset_secs: i64) -> Candle {
        Candle {
            tradingsymbol: "X".into(),
            exchange: Exchange::Nse,
            market: "NSE".into(),
            timeframe: Timeframe::FiveMin,
            bucket_start: Utc::now() + chrono::Duration::seconds(bucket_offset_secs),
            open: Decimal::try_from(close).unwrap(),
            high: Decimal::try_from(close).unwrap(),
            low: Decimal::try_from(close).unwrap(),
            close: Decimal::try_from(close).unwrap(),
            volume: 100,
            closed: true,
            backfilled: false,
        }
    }

    fn snapshot(values: &[(&str, f64)]) -> IndicatorSnapshot {
        IndicatorSnapshot {
            values: values.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            partial: false,
        }
    }

    fn scenario_a_config() -> StrategyConfig {
        let yaml = r#"
name: scenario-a
timeframe: 5min
threshold: 0.75
entry_rules:
  - condition: "close < bb_lower"
    weight: 0.6
  - condition: "rsi14 < 30"
    weight: 0.4
exit_rules: []
stop_loss:
  type: fixed
  value: "2%"
target:
  type: fixed
  value: "5%"
"#;
        StrategyConfig::from_yaml(yaml).unwrap()
    }

    #[test]
    fn scenario_a_single_buy() {
        let cfg = scenario_a_config();
        let mut engine = RuleEngine::new();
        let candle = candle(100.0, 0);
        let snap = snapshot(&[("bb_lower", 110.0), ("rsi14", 25.0)]);
        let (signal, _audit) = engine.evaluate("SBIN-EQ", &cfg, &candle, &snap, &StdHashMap::new()).unwrap();
        let signal = signal.expect("expected a BUY signal");
        assert_eq!(signal.kind, SignalKind::Buy);
        assert_eq!(signal.price, Decimal::try_from(100.0).unwrap());
        assert_eq!(engine.position("SBIN-EQ", "scenario-a").unwrap().state, PositionState::Open);
    }

    #[test]
    fn scenario_b_partial_exit() {
        let mut cfg = scenario_a_config();
        cfg.target = StopTargetSpec {
            kind: StopTargetKind::Multi,
            value: None,
            rules: vec![StopTargetRule {
                kind: StopTargetKind::Fixed,
                value: Some("5%".to_string()),
                id: "t1".to_string(),
                partial_exit: Some("50%".to_string()),
            }],
        };
        let mut engine = RuleEngine::new();
        let snap = snapshot(&[("bb_lower", 110.0), ("rsi14", 25.0)]);
        engine.evaluate("SBIN-EQ", &cfg, &candle(100.0, 0), &snap, &StdHashMap::new()).unwrap();

        let (signal, _) = engine.evaluate("SBIN-EQ", &cfg, &candle(106.0, 300), &snap, &StdHashMap::new()).unwrap();
        let signal = signal.expect("expected PARTIAL_SELL");
        assert_eq!(signal.kind, SignalKind::PartialSell { pct: 50, rule_id: "t1".to_string() });
        let pos = engine.position("SBIN-EQ", "scenario-a").unwrap();
        assert_eq!(pos.state, PositionState::Partial);
        assert_eq!(pos.remaining_fraction, Decimal::try_from(0.5).unwrap());
    }

    #[test]
    fn scenario_c_breakeven_save() {
        let mut cfg = scenario_a_config();
        cfg.stop_loss = StopTargetSpec {
            kind: StopTargetKind::Fixed,
            value: Some("2%".to_string()),
            rules: vec![],
        };
        cfg.trade_management.breakeven = Some(super::super::config::BreakevenSpec { trigger: 2.0 });

        let mut engine = RuleEngine::new();
        let snap = snapshot(&[("bb_lower", 110.0), ("rsi14", 25.0)]);
        engine.evaluate("SBIN-EQ", &cfg, &candle(100.0, 0), &snap, &StdHashMap::new()).unwrap();

        // Arm breakeven at 102.5 (>= 2% gain).
        let (signal, _) = engine.evaluate("SBIN-EQ", &cfg, &candle(102.5, 300), &snap, &StdHashMap::new()).unwrap();
        assert!(signal.is_none());
        assert!(engine.position("SBIN-EQ", "scenario-a").unwrap().breakeven_armed);

        // Stop would fire at 98.0 without breakeven; with it armed, floor is entry (100.0).
        let (signal, _) = engine.evaluate("SBIN-EQ", &cfg, &candle(98.5, 600), &snap, &StdHashMap::new()).unwrap();
        let signal = signal.expect("expected SELL via breakeven floor");
        assert!(signal.reason.contains("breakeven"));
        assert_eq!(signal.price, Decimal::try_from(98.5).unwrap());
    }

    #[test]
    fn flat_state_emits_no_signal_below_threshold() {
        let cfg = scenario_a_config();
        let mut engine = RuleEngine::new();
        let snap = snapshot(&[("bb_lower", 90.0), ("rsi14", 50.0)]);
        let (signal, _) = engine.evaluate("SBIN-EQ", &cfg, &candle(100.0, 0), &snap, &StdHashMap::new()).unwrap();
        assert!(signal.is_none());
        assert!(engine.position("SBIN-EQ", "scenario-a").is_none());
    }
}
