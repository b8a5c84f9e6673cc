// =============================================================================
// Average True Range (ATR) — Wilder's Smoothing Method
// =============================================================================
//
// True Range for bar i: TR_i = max(H_i - L_i, |H_i - C_{i-1}|, |L_i - C_{i-1}|)
// ATR_0 = SMA of first `period` TR values; ATR_t = Wilder smoothing of ATR_{t-1}
// and TR_t, exactly as RSI smooths avg_gain/avg_loss.
// =============================================================================

/// Compute the most recent ATR value from parallel highs/lows/closes slices
/// (oldest first, one entry per closed candle).
///
/// Returns `None` when `period == 0`, fewer than `period + 1` candles are
/// available, or any intermediate value is non-finite.
pub fn calculate_atr(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || highs.len() != lows.len() || highs.len() != closes.len() {
        return None;
    }
    if highs.len() < period + 1 {
        return None;
    }

    let mut tr_values: Vec<f64> = Vec::with_capacity(highs.len() - 1);
    for i in 1..highs.len() {
        let hl = highs[i] - lows[i];
        let hc = (highs[i] - closes[i - 1]).abs();
        let lc = (lows[i] - closes[i - 1]).abs();
        tr_values.push(hl.max(hc).max(lc));
    }

    if tr_values.len() < period {
        return None;
    }

    let seed: f64 = tr_values[..period].iter().sum::<f64>() / period as f64;
    if !seed.is_finite() {
        return None;
    }

    let period_f = period as f64;
    let mut atr = seed;
    for &tr in &tr_values[period..] {
        atr = (atr * (period_f - 1.0) + tr) / period_f;
        if !atr.is_finite() {
            return None;
        }
    }

    Some(atr)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(base: f64, spread: f64, n: usize) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
        let highs = vec![base + spread; n];
        let lows = vec![base - spread; n];
        let closes = vec![base; n];
        (highs, lows, closes)
    }

    #[test]
    fn atr_period_zero() {
        let (h, l, c) = flat(100.0, 5.0, 20);
        assert!(calculate_atr(&h, &l, &c, 0).is_none());
    }

    #[test]
    fn atr_insufficient_data() {
        let (h, l, c) = flat(100.0, 5.0, 10);
        assert!(calculate_atr(&h, &l, &c, 14).is_none());
    }

    #[test]
    fn atr_exact_minimum_data() {
        let highs = vec![102.0, 104.0, 106.0, 108.0];
        let lows = vec![98.0, 99.0, 100.0, 102.0];
        let closes = vec![101.0, 103.0, 105.0, 107.0];
        let atr = calculate_atr(&highs, &lows, &closes, 3);
        assert!(atr.is_some());
        assert!(atr.unwrap() > 0.0);
    }

    #[test]
    fn atr_constant_range_converges() {
        let mut highs = Vec::new();
        let mut lows = Vec::new();
        let mut closes = Vec::new();
        for i in 0..30 {
            let base = 100.0 + i as f64 * 0.1;
            highs.push(base + 5.0);
            lows.push(base - 5.0);
            closes.push(base);
        }
        let atr = calculate_atr(&highs, &lows, &closes, 14).unwrap();
        assert!((atr - 10.0).abs() < 1.0, "expected ATR near 10.0, got {atr}");
    }

    #[test]
    fn atr_true_range_uses_prev_close_on_gap() {
        // close at low, then gap up: |115-95|=20 > 115-108=7
        let highs = vec![105.0, 115.0, 118.0, 120.0];
        let lows = vec![95.0, 108.0, 110.0, 113.0];
        let closes = vec![95.0, 112.0, 115.0, 118.0];
        let atr = calculate_atr(&highs, &lows, &closes, 3).unwrap();
        assert!(atr > 7.0, "ATR should reflect the gap, got {atr}");
    }

    #[test]
    fn atr_nan_propagates_to_none() {
        let highs = vec![105.0, f64::NAN, 105.0, 105.0];
        let lows = vec![95.0, 95.0, 95.0, 95.0];
        let closes = vec![100.0, 100.0, 100.0, 100.0];
        assert!(calculate_atr(&highs, &lows, &closes, 3).is_none());
    }

    #[test]
    fn atr_result_is_positive() {
        let mut highs = Vec::new();
        let mut lows = Vec::new();
        let mut closes = Vec::new();
        for i in 0..50 {
            let base = 100.0 + (i as f64 * 0.5).sin() * 10.0;
            highs.push(base + 2.0);
            lows.push(base - 2.0);
            closes.push(base + 0.5);
        }
        let atr = calculate_atr(&highs, &lows, &closes, 14).unwrap();
        assert!(atr > 0.0, "ATR must be positive, got {atr}");
    }
}
