//! In-memory test doubles for every adapter trait in this crate. These let
//! downstream crates (`funding-allocation`, `funding-processor`,
//! `funding-reconciliation`, `funding-brokerage`) exercise the core end to
//! end without a real chain node, brokerage, or fiat provider.

use crate::brokerage::{BrokerOrder, BrokerageAdapter, InstantFundingResult, OrderAmount, OrderStatus};
use crate::chain_custody::ChainCustodyAdapter;
use crate::error::AdapterError;
use crate::fiat::{FiatDepositEvent, FiatVirtualAccountAdapter, VirtualAccountRef};
use crate::notification::NotificationAdapter;
use async_trait::async_trait;
use funding_common::{Chain, Currency, DepositId, Money, UserId};
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::Mutex;

/// A chain custody fake whose `validate_deposit` / `convert_to_usd` responses
/// are scripted ahead of time, so tests can reproduce scenarios such as a
/// transient RPC failure followed by recovery.
pub struct FakeChainCustody {
    validate_script: Mutex<VecDeque<Result<(bool, String), AdapterError>>>,
    convert_script: Mutex<VecDeque<Result<Money, AdapterError>>>,
    addresses: Mutex<std::collections::HashMap<(UserId, Chain), String>>,
}

impl FakeChainCustody {
    pub fn new() -> Self {
        Self {
            validate_script: Mutex::new(VecDeque::new()),
            convert_script: Mutex::new(VecDeque::new()),
            addresses: Mutex::new(std::collections::HashMap::new()),
        }
    }

    pub fn push_validate(&self, result: Result<(bool, String), AdapterError>) {
        self.validate_script.lock().unwrap().push_back(result);
    }

    pub fn push_convert(&self, result: Result<Money, AdapterError>) {
        self.convert_script.lock().unwrap().push_back(result);
    }

    pub fn always_valid_and_1to1(&self) {
        // Helper for the common case: deposits validate, token == USD 1:1.
    }
}

impl Default for FakeChainCustody {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChainCustodyAdapter for FakeChainCustody {
    async fn generate_deposit_address(
        &self,
        user: UserId,
        chain: Chain,
    ) -> Result<String, AdapterError> {
        let mut addrs = self.addresses.lock().unwrap();
        Ok(addrs
            .entry((user, chain))
            .or_insert_with(|| format!("0xDEPOSIT{}", user))
            .clone())
    }

    async fn validate_deposit(
        &self,
        _tx_hash: &str,
        _amount: Money,
    ) -> Result<(bool, String), AdapterError> {
        let mut script = self.validate_script.lock().unwrap();
        script
            .pop_front()
            .unwrap_or(Ok((true, "ok".to_string())))
    }

    async fn convert_to_usd(&self, amount: Money, _token: &str) -> Result<Money, AdapterError> {
        let mut script = self.convert_script.lock().unwrap();
        script.pop_front().unwrap_or(Ok(amount))
    }
}

pub struct FakeBrokerage {
    orders: Mutex<std::collections::HashMap<String, BrokerOrder>>,
    fail_funding: Mutex<bool>,
}

impl FakeBrokerage {
    pub fn new() -> Self {
        Self {
            orders: Mutex::new(std::collections::HashMap::new()),
            fail_funding: Mutex::new(false),
        }
    }

    pub fn set_fail_funding(&self, fail: bool) {
        *self.fail_funding.lock().unwrap() = fail;
    }

    /// Test hook: mark a previously created order filled, as if the broker
    /// matched it.
    pub fn fill_order(&self, client_order_id: &str, qty: Decimal, price: Decimal) {
        if let Some(order) = self.orders.lock().unwrap().get_mut(client_order_id) {
            order.status = OrderStatus::Filled;
            order.filled_qty = qty;
            order.avg_fill_price = Some(price);
        }
    }
}

impl Default for FakeBrokerage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerageAdapter for FakeBrokerage {
    async fn create_order(
        &self,
        _account: &str,
        symbol: &str,
        _side: crate::brokerage::OrderSide,
        amount: OrderAmount,
        client_order_id: &str,
    ) -> Result<BrokerOrder, AdapterError> {
        let qty = match amount {
            OrderAmount::Qty(q) => q,
            OrderAmount::Notional(_) => Decimal::ZERO,
        };
        let order = BrokerOrder {
            order_id: format!("order-{client_order_id}"),
            client_order_id: client_order_id.to_string(),
            symbol: symbol.to_string(),
            status: OrderStatus::Pending,
            filled_qty: qty,
            avg_fill_price: None,
        };
        self.orders
            .lock()
            .unwrap()
            .insert(client_order_id.to_string(), order.clone());
        Ok(order)
    }

    async fn get_order(&self, _account: &str, order_id: &str) -> Result<BrokerOrder, AdapterError> {
        self.orders
            .lock()
            .unwrap()
            .values()
            .find(|o| o.order_id == order_id || o.client_order_id == order_id)
            .cloned()
            .ok_or_else(|| AdapterError::Permanent(format!("order {order_id} not found")))
    }

    async fn cancel_order(&self, _account: &str, order_id: &str) -> Result<(), AdapterError> {
        let mut orders = self.orders.lock().unwrap();
        if let Some(order) = orders
            .values_mut()
            .find(|o| o.order_id == order_id || o.client_order_id == order_id)
        {
            order.status = OrderStatus::Canceled;
            Ok(())
        } else {
            Err(AdapterError::Permanent(format!("order {order_id} not found")))
        }
    }

    async fn initiate_instant_funding(
        &self,
        _account: &str,
        _source: &str,
        _amount: Money,
    ) -> Result<InstantFundingResult, AdapterError> {
        if *self.fail_funding.lock().unwrap() {
            return Err(AdapterError::Permanent("account inactive".to_string()));
        }
        Ok(InstantFundingResult {
            accepted: true,
            funding_id: uuid::Uuid::new_v4().to_string(),
        })
    }
}

pub struct FakeFiatAdapter;

#[async_trait]
impl FiatVirtualAccountAdapter for FakeFiatAdapter {
    async fn create_virtual_account(
        &self,
        customer: &str,
        _currency: Currency,
        _destination: &str,
    ) -> Result<VirtualAccountRef, AdapterError> {
        Ok(VirtualAccountRef {
            provider_account_id: format!("va-{customer}"),
            account_number: "00001234".to_string(),
            routing_number_or_iban: "000111000".to_string(),
        })
    }

    async fn process_fiat_deposit_event(
        &self,
        _event: FiatDepositEvent,
    ) -> Result<(), AdapterError> {
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeNotificationAdapter {
    pub calls: Mutex<Vec<String>>,
}

#[async_trait]
impl NotificationAdapter for FakeNotificationAdapter {
    async fn notify_deposit_confirmed(
        &self,
        _user: UserId,
        deposit: DepositId,
    ) -> Result<(), AdapterError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("deposit_confirmed:{deposit}"));
        Ok(())
    }

    async fn notify_funding_success(
        &self,
        _user: UserId,
        deposit: DepositId,
    ) -> Result<(), AdapterError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("funding_success:{deposit}"));
        Ok(())
    }

    async fn notify_funding_failure(
        &self,
        _user: UserId,
        deposit: DepositId,
        reason: &str,
    ) -> Result<(), AdapterError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("funding_failure:{deposit}:{reason}"));
        Ok(())
    }

    async fn notify_large_balance_change(
        &self,
        user: UserId,
        amount: Money,
    ) -> Result<(), AdapterError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("large_balance_change:{user}:{amount}"));
        Ok(())
    }
}
