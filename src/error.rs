//! Typed domain errors (spec §7 taxonomy), wrapped in `anyhow::Error` at
//! task/component boundaries.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AggregatorError {
    #[error("historical backfill query failed: {0}")]
    BackfillQueryFailed(String),
    #[error("publish buffer overflow, dropped {0} candles")]
    BufferOverflow(u64),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("strategy config '{name}' rejected: {reason}")]
    InvalidStrategy { name: String, reason: String },
    #[error("yaml parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("unknown pattern kind '{0}' (harmonic/wave are not implemented)")]
    UnknownPatternKind(String),
    #[error("unknown indicator kind '{0}'")]
    UnknownIndicatorKind(String),
    #[error("malformed condition: {0}")]
    MalformedCondition(String),
    #[error("io error reading config: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum RuleEngineError {
    #[error("state invariant violation for {symbol}/{strategy}: {detail}")]
    InvariantViolation {
        symbol: String,
        strategy: String,
        detail: String,
    },
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("producer send failed: {0}")]
    SendFailed(String),
    #[error("consumer commit failed: {0}")]
    CommitFailed(String),
    #[error("bus unreachable: {0}")]
    Unreachable(String),
}

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("authentication failed after {attempts} attempts: {reason}")]
    AuthFailed { attempts: u32, reason: String },
    #[error("rate limit exceeded")]
    RateLimited,
    #[error("historical data request failed: {0}")]
    HistoricalDataFailed(String),
}
