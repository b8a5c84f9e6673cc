// =============================================================================
// Shared types used across the FlexiTrade pipeline
// =============================================================================

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Whether the process is actively running, paused, or killed.
///
/// Mirrors the original engine's safety-override pattern: on config load
/// failure the process forces itself into `Paused` rather than trading
/// blind (see `runtime_config.rs`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradingMode {
    Live,
    Paused,
    Killed,
}

impl Default for TradingMode {
    fn default() -> Self {
        Self::Paused
    }
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Live => write!(f, "Live"),
            Self::Paused => write!(f, "Paused"),
            Self::Killed => write!(f, "Killed"),
        }
    }
}

/// Whether the broker capability is backed by the real wire protocol or an
/// offline mock (spec §6/§9 "Broker SDK as capability").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountMode {
    Offline,
    Live,
}

impl Default for AccountMode {
    fn default() -> Self {
        Self::Offline
    }
}

impl std::fmt::Display for AccountMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Offline => write!(f, "Offline"),
            Self::Live => write!(f, "Live"),
        }
    }
}

/// Exchange segment a tick or instrument belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Exchange {
    #[serde(rename = "NSE")]
    Nse,
    #[serde(rename = "BSE")]
    Bse,
    #[serde(rename = "MCX")]
    Mcx,
}

impl std::fmt::Display for Exchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Nse => write!(f, "NSE"),
            Self::Bse => write!(f, "BSE"),
            Self::Mcx => write!(f, "MCX"),
        }
    }
}

impl Exchange {
    /// Map the broker's numeric exchange-type byte (spec §4.1) to an `Exchange`.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Nse),
            3 => Some(Self::Bse),
            5 => Some(Self::Mcx),
            _ => None,
        }
    }
}

/// Subscription / quote granularity of a tick, per spec §4.1 byte 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TickMode {
    Ltp,
    Quote,
    Full,
}

impl TickMode {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Ltp),
            2 => Some(Self::Quote),
            3 => Some(Self::Full),
            _ => None,
        }
    }
}

/// Normalized tick emitted by the TickDecoder (spec §3 "Tick").
///
/// Carries the broker's emission timestamp, not the receive time — ordering
/// and late-tick detection in the Aggregator are defined against this field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tick {
    pub tradingsymbol: String,
    pub symboltoken: String,
    pub exchange: Exchange,
    pub ltp: Decimal,
    /// Cumulative session volume as reported by the broker.
    pub volume: u64,
    pub timestamp: DateTime<Utc>,
    pub mode: TickMode,
    /// Present only when `mode == Full`: the broker's own session OHLC.
    pub session_ohlc: Option<SessionOhlc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SessionOhlc {
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
}

/// Fixed, ordered set of supported timeframes (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    OneMin,
    FiveMin,
    FifteenMin,
    ThirtyMin,
    OneHour,
}

impl Timeframe {
    pub const ALL: [Timeframe; 5] = [
        Timeframe::OneMin,
        Timeframe::FiveMin,
        Timeframe::FifteenMin,
        Timeframe::ThirtyMin,
        Timeframe::OneHour,
    ];

    /// Duration of one bucket, in minutes.
    pub fn minutes(self) -> i64 {
        match self {
            Self::OneMin => 1,
            Self::FiveMin => 5,
            Self::FifteenMin => 15,
            Self::ThirtyMin => 30,
            Self::OneHour => 60,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::OneMin => "1min",
            Self::FiveMin => "5min",
            Self::FifteenMin => "15min",
            Self::ThirtyMin => "30min",
            Self::OneHour => "1hr",
        }
    }

    /// Broker historical-data-API interval name (spec §6).
    pub fn broker_interval(self) -> &'static str {
        match self {
            Self::OneMin => "ONE_MINUTE",
            Self::FiveMin => "FIVE_MINUTE",
            Self::FifteenMin => "FIFTEEN_MINUTE",
            Self::ThirtyMin => "THIRTY_MINUTE",
            Self::OneHour => "ONE_HOUR",
        }
    }

    pub fn from_str_key(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|tf| tf.as_str() == s)
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single OHLCV candle, keyed by `(symbol, timeframe, bucket_start)`.
///
/// Invariants (spec §3, §8): `low <= min(open, close) <= max(open, close) <=
/// high`, `volume >= 0`. Once `closed == true` the record is immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub tradingsymbol: String,
    pub exchange: Exchange,
    /// Market identifier used to key `market_params.<market>.<name>`
    /// substitutions (spec §4.4, §6); for this broker that's the exchange
    /// name itself (`"NSE"`, `"BSE"`, `"MCX"`).
    pub market: String,
    pub timeframe: Timeframe,
    pub bucket_start: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: u64,
    pub closed: bool,
    #[serde(default)]
    pub backfilled: bool,
}

impl Candle {
    /// Validate the OHLCV invariants from spec §8 invariant 1.
    pub fn is_valid(&self) -> bool {
        let lo = self.open.min(self.close);
        let hi = self.open.max(self.close);
        self.low <= lo && lo <= hi && hi <= self.high
    }

    pub fn key(&self) -> CandleKey {
        CandleKey {
            symbol: self.tradingsymbol.clone(),
            timeframe: self.timeframe,
            bucket_start: self.bucket_start,
        }
    }
}

/// Composite key identifying a unique candle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CandleKey {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub bucket_start: DateTime<Utc>,
}

/// Per-symbol position lifecycle (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionState {
    Flat,
    Open,
    Partial,
    Exited,
}

/// Per-(symbol, strategy) mutable state (spec §3 "Position").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub state: PositionState,
    pub entry_price: Decimal,
    pub entry_time: DateTime<Utc>,
    pub quantity: u64,
    pub highest_price_since_entry: Decimal,
    pub lowest_price_since_entry: Decimal,
    pub breakeven_armed: bool,
    pub remaining_fraction: Decimal,
}

/// A signal emitted by the RuleEngine (spec §4.4 "Signal emission").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub strategy: String,
    pub kind: SignalKind,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SignalKind {
    Buy,
    Sell,
    SellRule(String),
    PartialSell { pct: u32, rule_id: String },
    Hold,
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
            Self::SellRule(id) => write!(f, "SELL:{id}"),
            Self::PartialSell { pct, rule_id } => write!(f, "PARTIAL_SELL:{pct}:{rule_id}"),
            Self::Hold => write!(f, "HOLD"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn candle_validity_checks_ohlc_bounds() {
        let mut c = Candle {
            tradingsymbol: "SBIN-EQ".into(),
            exchange: Exchange::Nse,
            market: "NSE".into(),
            timeframe: Timeframe::FiveMin,
            bucket_start: Utc::now(),
            open: dec!(100),
            high: dec!(105),
            low: dec!(99),
            close: dec!(102),
            volume: 10,
            closed: true,
            backfilled: false,
        };
        assert!(c.is_valid());
        c.low = dec!(101);
        assert!(!c.is_valid());
    }

    #[test]
    fn timeframe_round_trips_through_string_key() {
        for tf in Timeframe::ALL {
            assert_eq!(Timeframe::from_str_key(tf.as_str()), Some(tf));
        }
    }

    #[test]
    fn exchange_byte_mapping_matches_protocol() {
        assert_eq!(Exchange::from_byte(1), Some(Exchange::Nse));
        assert_eq!(Exchange::from_byte(3), Some(Exchange::Bse));
        assert_eq!(Exchange::from_byte(5), Some(Exchange::Mcx));
        assert_eq!(Exchange::from_byte(9), None);
    }
}
