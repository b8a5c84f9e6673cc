//! Durable bus and key-value cache capability traits (spec §4.5, §6, §9
//! "globals constructed once, passed explicitly").
//!
//! Two transports per spec §4.5: a durable, partitioned, at-least-once log
//! (`TickBus`/`CandleBus`/`SignalBus`) and a fast TTL'd key-value cache
//! (`Cache`). Each trait has an in-memory implementation used by tests and
//! offline runs; a `kafka`/`redis`-shaped implementation is the integration
//! point a real deployment plugs in, mirroring the teacher's
//! `BinanceClient` vs mock split.

pub mod cache;
pub mod memory;

use async_trait::async_trait;

use crate::error::BusError;
use crate::types::{Candle, Signal, Tick};

/// Tick publication topic: `ticks.<exchange>`, partition key = symbol.
#[async_trait]
pub trait TickBus: Send + Sync {
    async fn publish(&self, topic: &str, key: &str, tick: &Tick) -> Result<(), BusError>;
}

/// Candle publication topic: `candles.<timeframe>`, partition key = symbol.
#[async_trait]
pub trait CandleBus: Send + Sync {
    async fn publish(&self, topic: &str, key: &str, candle: &Candle) -> Result<(), BusError>;
}

/// Signal + audit publication topics: `signals.<strategy>`,
/// `signals.audit.<strategy>`.
#[async_trait]
pub trait SignalBus: Send + Sync {
    async fn publish(&self, topic: &str, key: &str, signal: &Signal) -> Result<(), BusError>;
    async fn publish_audit(&self, topic: &str, key: &str, record: &serde_json::Value) -> Result<(), BusError>;
}

pub use cache::Cache;
