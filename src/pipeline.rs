//! Wires the ingestion stages together end to end (spec §2 pipeline):
//! TickDecoder -> Aggregator -> IndicatorEngine -> RuleEngine, in both the
//! live (websocket) and offline (historical replay) capability modes.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::app_state::AppState;
use crate::bus::{CandleBus, SignalBus};
use crate::decoder::{build_subscribe_payload, decode_frame_lossy};
use crate::historical::HistoricalRequest;
use crate::rules::patterns::{evaluate_price_action, evaluate_smc};
use crate::types::{Candle, Exchange, Tick, Timeframe};

const PATTERN_WINDOW: usize = 20;

type Windows = HashMap<(String, Timeframe), VecDeque<Candle>>;

/// Connects to the broker's tick websocket, decodes frames, and drives them
/// through aggregation/indicators/rules. Reconnects with the configured
/// backoff on any socket error (spec §4.1 "reconnect policy").
pub async fn run_live_ingestion(state: Arc<AppState>, shutdown: CancellationToken) {
    let ws_url = {
        let cfg = state.runtime_config.read();
        match &cfg.broker_base_url {
            Some(url) => url.replacen("https://", "wss://", 1).replacen("http://", "ws://", 1),
            None => {
                warn!("no broker_base_url configured, live ingestion cannot start");
                return;
            }
        }
    };

    let mut windows: Windows = HashMap::new();
    let mut backoff_ms = state.runtime_config.read().reconnect_base_ms;
    let reconnect_cap_ms = state.runtime_config.read().reconnect_cap_ms;

    while !shutdown.is_cancelled() {
        let (ws_stream, _) = match tokio_tungstenite::connect_async(&ws_url).await {
            Ok(pair) => pair,
            Err(e) => {
                error!(error = %e, backoff_ms, "websocket connect failed, backing off");
                if sleep_or_cancel(&shutdown, Duration::from_millis(backoff_ms)).await {
                    return;
                }
                backoff_ms = (backoff_ms * 2).min(reconnect_cap_ms);
                continue;
            }
        };
        info!(url = %ws_url, "tick websocket connected");
        backoff_ms = state.runtime_config.read().reconnect_base_ms;

        let (mut write, mut read) = ws_stream.split();

        let tokens = state.symbol_map.tokens();
        const SUBSCRIBE_MODE_FULL: u8 = 3;
        const NSE_EXCHANGE_TYPE: u8 = 1;
        let subscribe = build_subscribe_payload("startup", SUBSCRIBE_MODE_FULL, NSE_EXCHANGE_TYPE, &tokens);
        if let Err(e) = write.send(Message::Text(subscribe.to_string())).await {
            error!(error = %e, "failed to send subscribe frame, reconnecting");
            continue;
        }

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                msg = read.next() => match msg {
                    Some(Ok(Message::Binary(frame))) => {
                        if let Some(tick) = decode_frame_lossy(&frame, &state.symbol_map, &state.decode_drop_count) {
                            process_tick(&state, &tick, &mut windows).await;
                        }
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "websocket read error, reconnecting");
                        break;
                    }
                    None => {
                        warn!("websocket closed by peer, reconnecting");
                        break;
                    }
                },
            }
        }
    }
}

/// Offline replay: backfills each configured symbol/timeframe from the
/// historical data API and feeds the resulting candles through the
/// indicator/rule stages directly (there is no live tick stream to
/// aggregate in offline mode).
pub async fn run_offline_replay(state: Arc<AppState>, shutdown: CancellationToken) {
    let (symbols, lookback) = {
        let cfg = state.runtime_config.read();
        (cfg.symbols.clone(), cfg.lookback_candles)
    };
    let mut windows: Windows = HashMap::new();
    let to = Utc::now();
    let from = to - chrono::Duration::days(5);

    for symbol in &symbols {
        if shutdown.is_cancelled() {
            return;
        }
        for timeframe in Timeframe::ALL {
            let req = HistoricalRequest {
                exchange: Exchange::Nse,
                symboltoken: symbol.clone(),
                tradingsymbol: symbol.clone(),
                timeframe,
                from,
                to,
            };
            let candles = match state.historical.fetch_history(&req).await {
                Ok(c) => c,
                Err(e) => {
                    debug!(symbol = %symbol, timeframe = %timeframe.as_str(), error = %e, "historical fetch failed during offline replay");
                    continue;
                }
            };
            let candles = crate::aggregator::prepare_backfill(candles);
            let bootstrap_len = lookback.min(candles.len());
            if bootstrap_len > 0 {
                state
                    .indicator_engine
                    .lock()
                    .bootstrap(symbol, timeframe, candles[..bootstrap_len].to_vec());
            }
            for candle in candles.into_iter().skip(bootstrap_len) {
                publish_candle(&state, &candle).await;
                process_closed_candle(&state, candle, &mut windows).await;
            }
        }
    }
}

async fn process_tick(state: &Arc<AppState>, tick: &Tick, windows: &mut Windows) {
    for timeframe in Timeframe::ALL {
        let outcome = state.aggregator_for(&tick.tradingsymbol).lock().on_tick(tick, timeframe);
        if let Some(candle) = outcome.closed_candle {
            publish_candle(state, &candle).await;
            process_closed_candle(state, candle, windows).await;
        }
    }
}

async fn publish_candle(state: &Arc<AppState>, candle: &Candle) {
    if let Err(e) = state.candle_bus.publish("candles", &candle.tradingsymbol, candle).await {
        warn!(symbol = %candle.tradingsymbol, error = %e, "candle publish failed, buffering");
        state.publish_buffer.lock().push(candle.clone());
    }
}

/// Pushes one closed candle through the indicator engine and every strategy
/// whose timeframe matches it, publishing any resulting signal.
async fn process_closed_candle(state: &Arc<AppState>, candle: Candle, windows: &mut Windows) {
    let key = (candle.tradingsymbol.clone(), candle.timeframe);
    let window = windows.entry(key).or_insert_with(VecDeque::new);
    window.push_back(candle.clone());
    if window.len() > PATTERN_WINDOW {
        window.pop_front();
    }
    let window_slice: Vec<Candle> = window.iter().cloned().collect();

    let Some(snapshot) = state.indicator_engine.lock().step(&candle.tradingsymbol, candle.timeframe, candle.clone()) else {
        return;
    };

    let avg_volume_20 = if window_slice.is_empty() {
        0.0
    } else {
        window_slice.iter().map(|c| c.volume as f64).sum::<f64>() / window_slice.len() as f64
    };

    let mut pattern_flags = HashMap::new();
    pattern_flags.insert("smc".to_string(), evaluate_smc(&window_slice, avg_volume_20));
    pattern_flags.insert("price_action".to_string(), evaluate_price_action(&window_slice));

    let strategies: Vec<_> = state
        .strategies
        .read()
        .values()
        .filter(|s| s.timeframe == candle.timeframe)
        .cloned()
        .collect();

    for strategy in &strategies {
        let result = state
            .rule_engine_for(&candle.tradingsymbol)
            .lock()
            .evaluate(&candle.tradingsymbol, strategy, &candle, &snapshot, &pattern_flags);

        match result {
            Ok((Some(signal), audit)) => {
                if let Err(e) = state.signal_bus.publish("signals", &candle.tradingsymbol, &signal).await {
                    error!(symbol = %candle.tradingsymbol, strategy = %strategy.name, error = %e, "signal publish failed");
                }
                let _ = state.signal_bus.publish_audit("signals.audit", &candle.tradingsymbol, &audit.record).await;
            }
            Ok((None, audit)) => {
                let _ = state.signal_bus.publish_audit("signals.audit", &candle.tradingsymbol, &audit.record).await;
            }
            Err(e) => {
                error!(symbol = %candle.tradingsymbol, strategy = %strategy.name, error = %e, "rule evaluation failed");
            }
        }
    }
}

/// Sleeps for `dur` unless cancelled first. Returns `true` if cancelled.
async fn sleep_or_cancel(shutdown: &CancellationToken, dur: Duration) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => true,
        _ = tokio::time::sleep(dur) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_state::AppState;
    use crate::runtime_config::RuntimeConfig;
    use crate::types::AccountMode;

    #[tokio::test]
    async fn offline_replay_drives_candles_through_rule_engine_without_panicking() {
        let mut config = RuntimeConfig::default();
        config.account_mode = AccountMode::Offline;
        config.symbols = vec!["SBIN-EQ".to_string()];
        let state = Arc::new(AppState::new(config));
        let shutdown = CancellationToken::new();

        run_offline_replay(state.clone(), shutdown).await;
        // OfflineHistoricalApi returns no canned candles by default; this
        // just exercises the plumbing end to end without crashing.
        assert!(state.strategies.read().len() <= 1);
    }
}
