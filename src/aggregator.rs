//! Per-(symbol, timeframe) OHLCV candle assembly, backfill, and publication
//! (spec §4.2).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::market::{floor_to_bucket, is_gap};
use crate::types::{Candle, Exchange, Tick, Timeframe};

const DEFAULT_FLUSH_GRACE: chrono::Duration = chrono::Duration::seconds(2);
const MAX_BUFFERED_CANDLES: usize = 10_000;

/// Mutable state for a single (symbol, timeframe) the Aggregator owns.
#[derive(Debug, Clone)]
struct BucketState {
    current_bucket_start: DateTime<Utc>,
    open: Decimal,
    high: Decimal,
    low: Decimal,
    close: Decimal,
    volume: u64,
    last_seen_cumulative_volume: u64,
    exchange: Exchange,
}

impl BucketState {
    fn start_new(tick: &Tick, bucket_start: DateTime<Utc>) -> Self {
        Self {
            current_bucket_start: bucket_start,
            open: tick.ltp,
            high: tick.ltp,
            low: tick.ltp,
            close: tick.ltp,
            volume: 0,
            last_seen_cumulative_volume: tick.volume,
            exchange: tick.exchange,
        }
    }

    fn to_candle(&self, symbol: &str, timeframe: Timeframe, closed: bool) -> Candle {
        Candle {
            tradingsymbol: symbol.to_string(),
            exchange: self.exchange,
            market: self.exchange.to_string(),
            timeframe,
            bucket_start: self.current_bucket_start,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
            closed,
            backfilled: false,
        }
    }
}

/// Result of feeding one tick into the Aggregator: the candle closed as a
/// side effect of this tick crossing a bucket boundary, if any.
pub struct TickOutcome {
    pub closed_candle: Option<Candle>,
}

/// Outcome of a wall-clock flush pass.
pub struct FlushOutcome {
    pub closed_candle: Candle,
}

/// Bounded overflow buffer for candles awaiting publication (spec §4.2
/// Failure: "buffered in memory, bounded queue of 10,000; overflow drops
/// oldest and increments a counter").
#[derive(Default)]
pub struct PublishBuffer {
    queue: std::collections::VecDeque<Candle>,
    dropped: u64,
}

impl PublishBuffer {
    pub fn push(&mut self, candle: Candle) {
        self.queue.push_back(candle);
        while self.queue.len() > MAX_BUFFERED_CANDLES {
            self.queue.pop_front();
            self.dropped += 1;
        }
    }

    pub fn drain(&mut self) -> Vec<Candle> {
        self.queue.drain(..).collect()
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped
    }
}

/// Per-(symbol, timeframe) candle assembler. One instance is owned by
/// exactly one Aggregator worker (spec §3 Ownership) and processes ticks
/// for every (symbol, timeframe) pair hashed onto it.
#[derive(Default)]
pub struct Aggregator {
    state: HashMap<(String, Timeframe), BucketState>,
    flush_grace: chrono::Duration,
}

impl Aggregator {
    pub fn new() -> Self {
        Self {
            state: HashMap::new(),
            flush_grace: DEFAULT_FLUSH_GRACE,
        }
    }

    pub fn with_flush_grace(flush_grace: chrono::Duration) -> Self {
        Self {
            state: HashMap::new(),
            flush_grace,
        }
    }

    /// Feeds one tick for `timeframe` (spec §4.2 Tick handling).
    pub fn on_tick(&mut self, tick: &Tick, timeframe: Timeframe) -> TickOutcome {
        let bucket = floor_to_bucket(tick.timestamp, timeframe);
        let key = (tick.tradingsymbol.clone(), timeframe);

        match self.state.get_mut(&key) {
            None => {
                self.state.insert(key, BucketState::start_new(tick, bucket));
                TickOutcome { closed_candle: None }
            }
            Some(state) => {
                if bucket > state.current_bucket_start {
                    let closed = state.to_candle(&tick.tradingsymbol, timeframe, true);
                    if is_gap(state.current_bucket_start, bucket, timeframe) {
                        warn!(symbol = %tick.tradingsymbol, ?timeframe, "aggregator detected a bucket gap");
                    }
                    self.state.insert(key, BucketState::start_new(tick, bucket));
                    TickOutcome { closed_candle: Some(closed) }
                } else if bucket == state.current_bucket_start {
                    state.high = state.high.max(tick.ltp);
                    state.low = state.low.min(tick.ltp);
                    state.close = tick.ltp;
                    let delta = tick.volume.saturating_sub(state.last_seen_cumulative_volume);
                    state.volume = state.volume.saturating_add(delta);
                    state.last_seen_cumulative_volume = tick.volume;
                    TickOutcome { closed_candle: None }
                } else {
                    debug!(symbol = %tick.tradingsymbol, ?timeframe, "dropping late tick");
                    TickOutcome { closed_candle: None }
                }
            }
        }
    }

    /// Wall-clock flusher (spec §4.2): fires roughly every second per owned
    /// bucket; closes the candle if `now` has crossed the boundary by more
    /// than `flush_grace` with no advancing tick.
    pub fn flush_if_stale(&mut self, symbol: &str, timeframe: Timeframe, now: DateTime<Utc>) -> Option<FlushOutcome> {
        let key = (symbol.to_string(), timeframe);
        let state = self.state.get(&key)?;

        let bucket_end = state.current_bucket_start + chrono::Duration::minutes(timeframe.minutes());
        if now - bucket_end <= self.flush_grace {
            return None;
        }

        let closed = state.to_candle(symbol, timeframe, true);
        self.state.remove(&key);
        Some(FlushOutcome { closed_candle: closed })
    }

    pub fn current_bucket_start(&self, symbol: &str, timeframe: Timeframe) -> Option<DateTime<Utc>> {
        self.state.get(&(symbol.to_string(), timeframe)).map(|s| s.current_bucket_start)
    }
}

/// Marks a batch of historical candles as backfilled and sorts them in
/// ascending bucket order for publication (spec §4.2 Backfill).
pub fn prepare_backfill(mut candles: Vec<Candle>) -> Vec<Candle> {
    candles.sort_by_key(|c| c.bucket_start);
    for c in &mut candles {
        c.closed = true;
        c.backfilled = true;
    }
    candles
}
