//! In-memory bus implementation used for tests and offline runs.
//!
//! Mirrors the durable-log contract (at-least-once, key-partitioned) without
//! a real broker: every publish is appended to a per-topic, in-memory log
//! guarded by a `parking_lot::Mutex`, mirroring the teacher's preference for
//! `parking_lot` over `std::sync` locks.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

use super::{CandleBus, SignalBus, TickBus};
use crate::error::BusError;
use crate::types::{Candle, Signal, Tick};

#[derive(Default)]
pub struct InMemoryBus {
    ticks: Mutex<HashMap<String, Vec<(String, Tick)>>>,
    candles: Mutex<HashMap<String, Vec<(String, Candle)>>>,
    signals: Mutex<HashMap<String, Vec<(String, Signal)>>>,
    audit: Mutex<HashMap<String, Vec<(String, serde_json::Value)>>>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ticks_on(&self, topic: &str) -> Vec<(String, Tick)> {
        self.ticks.lock().get(topic).cloned().unwrap_or_default()
    }

    pub fn candles_on(&self, topic: &str) -> Vec<(String, Candle)> {
        self.candles.lock().get(topic).cloned().unwrap_or_default()
    }

    pub fn signals_on(&self, topic: &str) -> Vec<(String, Signal)> {
        self.signals.lock().get(topic).cloned().unwrap_or_default()
    }

    pub fn audit_on(&self, topic: &str) -> Vec<(String, serde_json::Value)> {
        self.audit.lock().get(topic).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl TickBus for InMemoryBus {
    async fn publish(&self, topic: &str, key: &str, tick: &Tick) -> Result<(), BusError> {
        self.ticks.lock().entry(topic.to_string()).or_default().push((key.to_string(), tick.clone()));
        Ok(())
    }
}

#[async_trait]
impl CandleBus for InMemoryBus {
    async fn publish(&self, topic: &str, key: &str, candle: &Candle) -> Result<(), BusError> {
        self.candles.lock().entry(topic.to_string()).or_default().push((key.to_string(), candle.clone()));
        Ok(())
    }
}

#[async_trait]
impl SignalBus for InMemoryBus {
    async fn publish(&self, topic: &str, key: &str, signal: &Signal) -> Result<(), BusError> {
        self.signals.lock().entry(topic.to_string()).or_default().push((key.to_string(), signal.clone()));
        Ok(())
    }

    async fn publish_audit(&self, topic: &str, key: &str, record: &serde_json::Value) -> Result<(), BusError> {
        self.audit.lock().entry(topic.to_string()).or_default().push((key.to_string(), record.clone()));
        Ok(())
    }
}
