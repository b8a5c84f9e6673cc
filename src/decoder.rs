//! Binary tick-frame decoding (spec §4.1).
//!
//! Frame layout (little-endian, offsets from frame start), grounded in
//! `original_source/src/anquant/py/core/adapters/angelone.py`:
//!
//! - byte 0: subscription mode `{1=LTP, 2=QUOTE, 3=FULL}`
//! - byte 1: exchange type `{1=NSE, 3=BSE, 5=MCX}`
//! - bytes 2..27: ASCII token, NUL-padded
//! - bytes 35..43: timestamp, ms since epoch, u64
//! - bytes 43..51: LTP x 100, u64
//! - bytes 51..59: cumulative session volume, u64
//! - bytes 59..91: open/high/low/close x 100, u64 each (QUOTE/FULL only)

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{debug, warn};

use crate::types::{Exchange, SessionOhlc, Tick, TickMode};

pub const CONTROL_FRAME_MIN_LEN: usize = 43;
pub const PONG_BODY: &[u8] = b"pong";

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("frame too short: {0} bytes")]
    TooShort(usize),
    #[error("unrecognized subscription mode byte {0}")]
    BadMode(u8),
    #[error("unrecognized exchange byte {0}")]
    BadExchange(u8),
    #[error("token not found in symbol map: {0}")]
    UnknownToken(String),
    #[error("token bytes are not valid utf-8")]
    BadTokenEncoding,
}

/// Immutable process-local token -> tradingsymbol map, loaded once at startup
/// (spec §5 "no process-wide mutable singletons other than the immutable
/// token->symbol map").
#[derive(Debug, Clone, Default)]
pub struct SymbolMap {
    by_token: HashMap<String, String>,
}

impl SymbolMap {
    pub fn new(entries: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            by_token: entries.into_iter().collect(),
        }
    }

    pub fn resolve(&self, token: &str) -> Option<&str> {
        self.by_token.get(token).map(String::as_str)
    }

    pub fn tokens(&self) -> Vec<String> {
        self.by_token.keys().cloned().collect()
    }
}

/// Reconnect backoff schedule: base 1s, cap 30s, +/-20% jitter (spec §4.1).
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub cap: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the `attempt`th reconnect (0-indexed), with deterministic
    /// jitter derived from the attempt number so tests are reproducible.
    /// Real callers should still treat the jitter as "approximately +/-20%".
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.base.as_millis().saturating_mul(1u128 << attempt.min(10));
        let capped = exp.min(self.cap.as_millis());
        let jitter_pct = ((attempt % 5) as i128 - 2) * 8; // deterministic -16%..+16%
        let jittered = (capped as i128 * (100 + jitter_pct) / 100).max(0) as u64;
        Duration::from_millis(jittered)
    }
}

/// Returns `true` if this is a heartbeat ("pong") frame to be ignored
/// silently, as opposed to a short/malformed frame which is dropped with a
/// debug log.
pub fn is_heartbeat(frame: &[u8]) -> bool {
    frame == PONG_BODY
}

/// Parses one raw binary frame into a normalized `Tick`.
///
/// Per spec §4.1: frames shorter than 43 bytes (and the literal `"pong"`
/// heartbeat) are control frames and are not errors in the operational
/// sense, but callers should route them through [`is_heartbeat`] /
/// length-checks before calling this so the error here always indicates a
/// genuinely malformed data frame.
pub fn decode_frame(frame: &[u8], symbols: &SymbolMap) -> Result<Tick, DecodeError> {
    if frame.len() < CONTROL_FRAME_MIN_LEN {
        return Err(DecodeError::TooShort(frame.len()));
    }

    let mode = TickMode::from_byte(frame[0]).ok_or(DecodeError::BadMode(frame[0]))?;
    let exchange = Exchange::from_byte(frame[1]).ok_or(DecodeError::BadExchange(frame[1]))?;

    let token_bytes = &frame[2..27];
    let token = std::str::from_utf8(token_bytes)
        .map_err(|_| DecodeError::BadTokenEncoding)?
        .trim_end_matches('\0')
        .to_string();

    let tradingsymbol = symbols
        .resolve(&token)
        .ok_or_else(|| DecodeError::UnknownToken(token.clone()))?
        .to_string();

    // Full-frame fields (timestamp/ltp/volume) require bytes up to 59;
    // anything shorter than that but >= 43 is still a valid LTP-only frame
    // in some broker modes, but this protocol always carries through byte 59
    // for the fields we need, so require it explicitly.
    if frame.len() < 59 {
        return Err(DecodeError::TooShort(frame.len()));
    }

    let timestamp_ms = read_u64_le(frame, 35);
    let timestamp = ms_to_datetime(timestamp_ms);

    let ltp_raw = read_u64_le(frame, 43);
    let ltp = Decimal::from(ltp_raw) / Decimal::from(100);

    let volume = read_u64_le(frame, 51);

    let session_ohlc = if matches!(mode, TickMode::Quote | TickMode::Full) && frame.len() >= 91 {
        let open = Decimal::from(read_u64_le(frame, 59)) / Decimal::from(100);
        let high = Decimal::from(read_u64_le(frame, 67)) / Decimal::from(100);
        let low = Decimal::from(read_u64_le(frame, 75)) / Decimal::from(100);
        let close = Decimal::from(read_u64_le(frame, 83)) / Decimal::from(100);
        Some(SessionOhlc { open, high, low, close })
    } else {
        None
    };

    Ok(Tick {
        tradingsymbol,
        symboltoken: token,
        exchange,
        ltp,
        volume,
        timestamp,
        mode,
        session_ohlc,
    })
}

/// Decodes a frame, logging and dropping (never propagating) any decode
/// failure, per spec §4.1 "the decoder never suspends the websocket" and §7
/// "decode error: per-frame drop, counter incremented, logged at DEBUG".
pub fn decode_frame_lossy(frame: &[u8], symbols: &SymbolMap, drop_counter: &std::sync::atomic::AtomicU64) -> Option<Tick> {
    if is_heartbeat(frame) {
        return None;
    }
    match decode_frame(frame, symbols) {
        Ok(tick) => Some(tick),
        Err(DecodeError::UnknownToken(token)) => {
            warn!(token = %token, "dropping tick for unknown token");
            drop_counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            None
        }
        Err(err) => {
            debug!(error = %err, len = frame.len(), "dropping malformed frame");
            drop_counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            None
        }
    }
}

fn read_u64_le(frame: &[u8], offset: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&frame[offset..offset + 8]);
    u64::from_le_bytes(buf)
}

fn ms_to_datetime(ms: u64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms as i64)
        .single()
        .unwrap_or_else(Utc::now)
}

/// Outbound subscription frame body (spec §6).
pub fn build_subscribe_payload(correlation_id: &str, mode: u8, exchange_type: u8, tokens: &[String]) -> serde_json::Value {
    serde_json::json!({
        "correlationID": correlation_id,
        "action": 1,
        "params": {
            "mode": mode,
            "tokenList": [
                { "exchangeType": exchange_type, "tokens": tokens }
            ]
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_frame(mode: u8, exchange: u8, token: &str, ts_ms: u64, ltp_x100: u64, volume: u64, ohlc_x100: Option<(u64, u64, u64, u64)>) -> Vec<u8> {
        let mut frame = vec![0u8; if ohlc_x100.is_some() { 91 } else { 59 }];
        frame[0] = mode;
        frame[1] = exchange;
        let token_bytes = token.as_bytes();
        frame[2..2 + token_bytes.len()].copy_from_slice(token_bytes);
        frame[35..43].copy_from_slice(&ts_ms.to_le_bytes());
        frame[43..51].copy_from_slice(&ltp_x100.to_le_bytes());
        frame[51..59].copy_from_slice(&volume.to_le_bytes());
        if let Some((o, h, l, c)) = ohlc_x100 {
            frame[59..67].copy_from_slice(&o.to_le_bytes());
            frame[67..75].copy_from_slice(&h.to_le_bytes());
            frame[75..83].copy_from_slice(&l.to_le_bytes());
            frame[83..91].copy_from_slice(&c.to_le_bytes());
        }
        frame
    }

    #[test]
    fn scenario_f_binary_decode() {
        // spec §8 Scenario F
        let symbols = SymbolMap::new([("3045".to_string(), "SBIN-EQ".to_string())]);
        let frame = build_frame(2, 1, "3045", 1_700_000_000_000, 300_000, 12345, Some((299_000, 301_000, 298_500, 300_000)));
        let tick = decode_frame(&frame, &symbols).expect("decode ok");
        assert_eq!(tick.exchange, Exchange::Nse);
        assert_eq!(tick.tradingsymbol, "SBIN-EQ");
        assert_eq!(tick.ltp, Decimal::from(3000));
        assert_eq!(tick.volume, 12345);
        assert_eq!(tick.timestamp.to_rfc3339(), "2023-11-14T22:13:20+00:00");
        assert!(tick.session_ohlc.is_some());
    }

    #[test]
    fn short_frame_is_control() {
        let frame = vec![0u8; 10];
        let symbols = SymbolMap::default();
        assert!(matches!(decode_frame(&frame, &symbols), Err(DecodeError::TooShort(10))));
    }

    #[test]
    fn pong_body_is_heartbeat() {
        assert!(is_heartbeat(b"pong"));
        assert!(!is_heartbeat(b"pongx"));
    }

    #[test]
    fn unknown_token_is_dropped_not_thrown() {
        let symbols = SymbolMap::default();
        let frame = build_frame(1, 1, "9999", 1_700_000_000_000, 100, 1, None);
        assert!(matches!(decode_frame(&frame, &symbols), Err(DecodeError::UnknownToken(_))));
        let counter = std::sync::atomic::AtomicU64::new(0);
        assert!(decode_frame_lossy(&frame, &symbols, &counter).is_none());
        assert_eq!(counter.load(std::sync::atomic::Ordering::Relaxed), 1);
    }

    #[test]
    fn reconnect_backoff_is_capped() {
        let policy = ReconnectPolicy::default();
        for attempt in 0..20 {
            let d = policy.delay_for(attempt);
            assert!(d <= Duration::from_millis((policy.cap.as_millis() as u64) * 116 / 100));
        }
    }

    #[test]
    fn ltp_only_frame_without_ohlc() {
        let symbols = SymbolMap::new([("1".to_string(), "X".to_string())]);
        let frame = build_frame(1, 1, "1", 1_700_000_000_000, 100, 1, None);
        let tick = decode_frame(&frame, &symbols).unwrap();
        assert!(tick.session_ohlc.is_none());
    }
}
