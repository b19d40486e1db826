use crate::error::AdapterError;
use async_trait::async_trait;
use funding_common::Money;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum OrderAmount {
    Notional(Money),
    Qty(Decimal),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerOrder {
    pub order_id: String,
    pub client_order_id: String,
    pub symbol: String,
    pub status: OrderStatus,
    pub filled_qty: Decimal,
    pub avg_fill_price: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstantFundingResult {
    pub accepted: bool,
    pub funding_id: String,
}

/// Brokerage contract. `client_order_id` is always chosen by the caller
/// (this core) for idempotency on the broker's side.
#[async_trait]
pub trait BrokerageAdapter: Send + Sync {
    async fn create_order(
        &self,
        account: &str,
        symbol: &str,
        side: OrderSide,
        amount: OrderAmount,
        client_order_id: &str,
    ) -> Result<BrokerOrder, AdapterError>;

    async fn get_order(&self, account: &str, order_id: &str) -> Result<BrokerOrder, AdapterError>;

    async fn cancel_order(&self, account: &str, order_id: &str) -> Result<(), AdapterError>;

    async fn initiate_instant_funding(
        &self,
        account: &str,
        source: &str,
        amount: Money,
    ) -> Result<InstantFundingResult, AdapterError>;
}
