// =============================================================================
// Moving Average Convergence/Divergence (MACD)
// =============================================================================
//
// ema(x, n) = alpha*x + (1-alpha)*prev, alpha = 2/(n+1), seeded with the
// FIRST close (not SMA — this differs from the trend-following EMA used
// elsewhere in the book). macd_line = ema(close,fast) - ema(close,slow);
// signal = ema(macd_line, signal_period); hist = macd_line - signal.
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacdResult {
    pub line: f64,
    pub signal: f64,
    pub hist: f64,
}

/// Seeded-with-first-value EMA series, one output per input (spec §4.3 MACD).
fn ema_seeded_first(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.is_empty() {
        return Vec::new();
    }
    let alpha = 2.0 / (period as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut prev = values[0];
    out.push(prev);
    for &x in &values[1..] {
        prev = alpha * x + (1.0 - alpha) * prev;
        out.push(prev);
    }
    out
}

/// Computes the latest MACD line/signal/histogram from a `closes` slice
/// (oldest first). Returns `None` when there are too few closes to seed both
/// the slow EMA and the signal EMA, or any intermediate is non-finite.
pub fn calculate_macd(closes: &[f64], fast: usize, slow: usize, signal_period: usize) -> Option<MacdResult> {
    if fast == 0 || slow == 0 || signal_period == 0 || fast >= slow {
        return None;
    }
    // Need at least `slow` closes to have a meaningful slow EMA, plus
    // `signal_period` MACD-line points to seed the signal EMA.
    if closes.len() < slow + signal_period {
        return None;
    }

    let ema_fast = ema_seeded_first(closes, fast);
    let ema_slow = ema_seeded_first(closes, slow);

    let macd_series: Vec<f64> = ema_fast.iter().zip(ema_slow.iter()).map(|(f, s)| f - s).collect();
    if macd_series.iter().any(|v| !v.is_finite()) {
        return None;
    }

    let signal_series = ema_seeded_first(&macd_series, signal_period);

    let line = *macd_series.last()?;
    let signal = *signal_series.last()?;
    let hist = line - signal;

    if line.is_finite() && signal.is_finite() && hist.is_finite() {
        Some(MacdResult { line, signal, hist })
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macd_insufficient_data_returns_none() {
        let closes = vec![1.0, 2.0, 3.0];
        assert!(calculate_macd(&closes, 12, 26, 9).is_none());
    }

    #[test]
    fn macd_fast_must_be_less_than_slow() {
        let closes: Vec<f64> = (1..=60).map(|x| x as f64).collect();
        assert!(calculate_macd(&closes, 26, 12, 9).is_none());
    }

    #[test]
    fn macd_flat_market_is_all_zero() {
        let closes = vec![100.0; 60];
        let r = calculate_macd(&closes, 12, 26, 9).unwrap();
        assert!((r.line).abs() < 1e-9);
        assert!((r.signal).abs() < 1e-9);
        assert!((r.hist).abs() < 1e-9);
    }

    #[test]
    fn macd_uptrend_is_positive() {
        let closes: Vec<f64> = (1..=60).map(|x| x as f64).collect();
        let r = calculate_macd(&closes, 12, 26, 9).unwrap();
        assert!(r.line > 0.0, "expected positive MACD line in uptrend, got {}", r.line);
    }

    #[test]
    fn macd_hist_equals_line_minus_signal() {
        let closes: Vec<f64> = (1..=60).map(|x| (x as f64).sin() * 10.0 + 100.0).collect();
        let r = calculate_macd(&closes, 12, 26, 9).unwrap();
        assert!((r.hist - (r.line - r.signal)).abs() < 1e-9);
    }

    #[test]
    fn ema_seeded_first_starts_at_first_value() {
        let series = ema_seeded_first(&[5.0, 5.0, 5.0], 3);
        assert_eq!(series[0], 5.0);
    }
}
