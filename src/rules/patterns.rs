//! Pattern evaluation (spec §3 "StrategyConfig.patterns" supplement, grounded
//! in `original_source/rule_engine.py`'s `_evaluate_smc_pattern` and
//! `_evaluate_price_action_pattern`). `harmonic`/`wave` are rejected at
//! config-load (see `rules::config`) and have no evaluator here.

use crate::types::Candle;

/// Smart-Money-Concepts order-block pattern: a prior down/up candle on
/// above-average volume, immediately followed by a reversal candle,
/// signalling an institutional order block. Mirrors the original's
/// `prev_high`/`prev_low`/`volume`/`avg_volume_20` comparison.
pub fn evaluate_smc(window: &[Candle], avg_volume_20: f64) -> bool {
    let Some([prev, curr]) = window.len().checked_sub(2).map(|i| [&window[i], &window[i + 1]]) else {
        return false;
    };

    let prev_bearish = prev.close < prev.open;
    let curr_bullish = curr.close > curr.open;
    let high_volume = (prev.volume as f64) > avg_volume_20 * 1.5;
    let reclaimed_high = curr.close > prev.high;

    prev_bearish && curr_bullish && high_volume && reclaimed_high
}

/// Bullish-engulfing price-action pattern: a bearish candle followed by a
/// bullish candle whose full range engulfs the prior candle's range.
/// Mirrors the original's `curr.close > prev.high and curr.open < prev.low`.
pub fn evaluate_price_action(window: &[Candle]) -> bool {
    let Some([prev, curr]) = window.len().checked_sub(2).map(|i| [&window[i], &window[i + 1]]) else {
        return false;
    };

    let prev_bearish = prev.close < prev.open;
    let curr_bullish = curr.close > curr.open;
    let engulfs = curr.close > prev.high && curr.open < prev.low;

    prev_bearish && curr_bullish && engulfs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Exchange, Timeframe};
    use chrono::Utc;

    fn candle(open: f64, close: f64, high: f64, low: f64, volume: u64) -> Candle {
        Candle {
            tradingsymbol: "X".into(),
            exchange: Exchange::Nse,
            market: "NSE".into(),
            timeframe: Timeframe::FiveMin,
            bucket_start: Utc::now(),
            open: rust_decimal::Decimal::try_from(open).unwrap(),
            high: rust_decimal::Decimal::try_from(high).unwrap(),
            low: rust_decimal::Decimal::try_from(low).unwrap(),
            close: rust_decimal::Decimal::try_from(close).unwrap(),
            volume,
            closed: true,
            backfilled: false,
        }
    }

    #[test]
    fn smc_order_block_detected_on_high_volume_reversal() {
        let window = vec![
            candle(105.0, 100.0, 106.0, 99.0, 10_000),
            candle(100.0, 108.0, 109.0, 99.5, 5_000),
        ];
        assert!(evaluate_smc(&window, 5_000.0));
    }

    #[test]
    fn smc_rejects_low_volume() {
        let window = vec![
            candle(105.0, 100.0, 106.0, 99.0, 1_000),
            candle(100.0, 108.0, 109.0, 99.5, 5_000),
        ];
        assert!(!evaluate_smc(&window, 5_000.0));
    }

    #[test]
    fn bullish_engulfing_detected() {
        let window = vec![candle(105.0, 100.0, 106.0, 99.0, 1), candle(98.0, 107.0, 108.0, 97.0, 1)];
        assert!(evaluate_price_action(&window));
    }

    #[test]
    fn body_engulfing_without_range_engulfing_is_rejected() {
        // curr's body engulfs prev's body, but curr.close does not clear
        // prev.high and curr.open does not clear prev.low — not a real
        // range-engulfing bar, so this must not fire.
        let window = vec![candle(105.0, 100.0, 106.0, 99.0, 1), candle(99.0, 106.0, 107.0, 98.0, 1)];
        assert!(!evaluate_price_action(&window));
    }

    #[test]
    fn no_pattern_when_window_too_short() {
        assert!(!evaluate_smc(&[candle(1.0, 1.0, 1.0, 1.0, 1)], 1.0));
        assert!(!evaluate_price_action(&[]));
    }
}
