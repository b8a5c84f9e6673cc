// =============================================================================
// FlexiTrade — Main Entry Point
// =============================================================================
//
// The pipeline starts in Paused + Offline mode for safety. Operators must
// explicitly switch to Live mode via the config file or environment.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod aggregator;
mod app_state;
mod broker;
mod bus;
mod decoder;
mod error;
mod historical;
mod indicators;
mod market;
mod pipeline;
mod rules;
mod runtime_config;
mod types;

use std::process::ExitCode;
use std::sync::Arc;

use chrono::Utc;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::broker::BrokerFeed;
use crate::bus::SignalBus;
use crate::error::BrokerError;
use crate::runtime_config::RuntimeConfig;
use crate::types::{AccountMode, TradingMode};

/// Real-time equities tick ingestion, OHLCV aggregation, indicator engine,
/// and FlexiRule strategy evaluator.
#[derive(Debug, Parser)]
#[command(name = "flexitrade", version)]
struct Cli {
    /// Path to the runtime config JSON file.
    #[arg(long, default_value = "runtime_config.json", env = "FLEXITRADE_CONFIG")]
    config: std::path::PathBuf,

    /// Force offline (mock broker/historical-data) mode regardless of config.
    #[arg(long)]
    offline: bool,

    /// Override the number of Aggregator worker shards.
    #[arg(long)]
    aggregator_workers: Option<usize>,

    /// Override the number of RuleEngine worker shards.
    #[arg(long)]
    rule_engine_workers: Option<usize>,
}

const CONFIG_ERROR: u8 = 1;
const BROKER_AUTH_ERROR: u8 = 2;
const FATAL_BUS_ERROR: u8 = 3;
const CANCELLED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenv::dotenv();
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("FlexiTrade starting up");

    let mut config = match RuntimeConfig::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(error = %e, path = %cli.config.display(), "failed to load runtime config, falling back to Paused defaults");
            RuntimeConfig::default()
        }
    };

    // SAFETY: force Paused on startup; operators opt into Live explicitly.
    config.trading_mode = TradingMode::Paused;
    if cli.offline {
        config.account_mode = AccountMode::Offline;
    }
    if let Some(n) = cli.aggregator_workers {
        config.aggregator_workers = n;
    }
    if let Some(n) = cli.rule_engine_workers {
        config.rule_engine_workers = n;
    }

    if config.symbols.is_empty() {
        error!("no symbols configured");
        return ExitCode::from(CONFIG_ERROR);
    }

    info!(
        symbols = ?config.symbols,
        trading_mode = %config.trading_mode,
        account_mode = %config.account_mode,
        "pipeline starting in SAFE mode (Paused)"
    );

    let config_path = cli.config.clone();
    let state = Arc::new(AppState::new(config));

    if state.strategies.read().is_empty() {
        warn!("no valid strategy configs loaded; the RuleEngine will never fire until one is added");
    }

    if state.runtime_config.read().account_mode == AccountMode::Live {
        if let Err(e) = state.broker.subscribe(&[]).await {
            error!(error = %e, "broker authentication failed, refusing to start");
            return ExitCode::from(broker_exit_code(&e));
        }
    }

    if let Err(e) = state
        .signal_bus
        .publish_audit("signals.audit.startup", "startup", &serde_json::json!({"event": "pipeline_start", "at": Utc::now()}))
        .await
    {
        error!(error = %e, "bus unreachable at startup, refusing to start");
        return ExitCode::from(FATAL_BUS_ERROR);
    }

    let shutdown = CancellationToken::new();
    let shutdown_deadline = std::time::Duration::from_secs(state.runtime_config.read().shutdown_deadline_secs);

    // ── Wall-clock flusher: closes buckets that have gone stale without a
    // closing tick (spec §4.2 "Flush"). ──────────────────────────────────────
    let flusher_state = state.clone();
    let flusher_shutdown = shutdown.clone();
    let flusher = tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(1));
        loop {
            tokio::select! {
                _ = flusher_shutdown.cancelled() => break,
                _ = interval.tick() => run_flush_pass(&flusher_state).await,
            }
        }
    });

    // ── Ingestion: a live websocket feed or a one-shot offline replay,
    // depending on account mode (spec §9 "Broker SDK as capability"). ───────
    let ingestion_state = state.clone();
    let ingestion_shutdown = shutdown.clone();
    let ingestion = tokio::spawn(async move {
        match ingestion_state.runtime_config.read().account_mode {
            AccountMode::Live => crate::pipeline::run_live_ingestion(ingestion_state.clone(), ingestion_shutdown).await,
            AccountMode::Offline => crate::pipeline::run_offline_replay(ingestion_state.clone(), ingestion_shutdown).await,
        }
    });

    info!("All subsystems running. Press Ctrl+C to stop.");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for ctrl-c");
    }
    warn!("shutdown signal received, stopping gracefully");

    shutdown.cancel();
    if tokio::time::timeout(shutdown_deadline, flusher).await.is_err() {
        error!("component did not stop within the shutdown deadline");
    }
    if tokio::time::timeout(shutdown_deadline, ingestion).await.is_err() {
        error!("ingestion task did not stop within the shutdown deadline");
    }

    if let Err(e) = state.runtime_config.read().save(&config_path) {
        error!(error = %e, "failed to save runtime config on shutdown");
    }

    info!("FlexiTrade shut down complete");
    ExitCode::from(CANCELLED)
}

fn broker_exit_code(e: &BrokerError) -> u8 {
    match e {
        BrokerError::AuthFailed { .. } => BROKER_AUTH_ERROR,
        _ => BROKER_AUTH_ERROR,
    }
}

/// One pass of the wall-clock flusher over every (symbol, timeframe) pair
/// currently tracked by each Aggregator shard.
async fn run_flush_pass(state: &Arc<AppState>) {
    let now = Utc::now();
    let symbols = state.runtime_config.read().symbols.clone();

    for symbol in &symbols {
        for timeframe in crate::types::Timeframe::ALL {
            let outcome = state.aggregator_for(symbol).lock().flush_if_stale(symbol, timeframe, now);
            if let Some(outcome) = outcome {
                use crate::bus::CandleBus;
                if let Err(e) = state.candle_bus.publish("candles", symbol, &outcome.closed_candle).await {
                    warn!(symbol = %symbol, error = %e, "candle publish failed, buffering");
                    state.publish_buffer.lock().push(outcome.closed_candle);
                }
            }
        }
    }
}
