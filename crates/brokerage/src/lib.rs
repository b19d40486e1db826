//! Brokerage funding bridge: moves `invest_buffer` balances into the
//! external brokerage as instant funding, and fans out basket orders across
//! a deposit's invested components. The basket-to-sub-order mapping lives in
//! `funding-storage` (`baskets`, `basket_orders`), not a process-local map —
//! `get_order_status` always reconciles live from the brokerage adapter
//! rather than trusting the persisted rows as a cache.

use chrono::Utc;
use funding_adapters::brokerage::{BrokerageAdapter, OrderAmount, OrderSide, OrderStatus};
use funding_adapters::AdapterError;
use funding_common::{
    AccountType, AuditLogEntry, CoreError, Deposit, DepositId, DepositStatus, EntryDirection, Money,
    TransactionType, UserId,
};
use funding_ledger::Ledger;
use funding_storage::baskets::{BasketMeta, NewBasketOrder};
use funding_storage::{AuditLogRepository, BasketRepository, BrokerageAccountRepository, DepositRepository, NewEntry};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// One leg of a basket: a symbol and its target weight (weights need not sum
/// to 1; each component's share is `weight / total_weight`).
#[derive(Debug, Clone)]
pub struct BasketComponent {
    pub symbol: String,
    pub weight: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateStatus {
    Pending,
    PartiallyFilled,
    Filled,
}

#[derive(Debug, Clone)]
pub struct BasketOrderStatus {
    pub basket_ref: String,
    pub status: AggregateStatus,
    pub filled_qty: Decimal,
    pub avg_fill_price: Option<Decimal>,
}

/// Below this proportional notional, a basket component is skipped rather
/// than sent to the broker as a dust order.
const MIN_COMPONENT_NOTIONAL: Decimal = Decimal::ONE;

const MAX_RETRIES: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(200);

/// Tuning for [`BrokerageBridge::run`]'s periodic sweep of confirmed
/// deposits awaiting broker funding.
#[derive(Debug, Clone, Copy)]
pub struct BrokerageSweepConfig {
    pub interval: Duration,
    pub batch_size: i64,
}

impl Default for BrokerageSweepConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            batch_size: 50,
        }
    }
}

pub struct BrokerageBridge {
    brokerage: Arc<dyn BrokerageAdapter>,
    brokerage_accounts: Arc<dyn BrokerageAccountRepository>,
    baskets: Arc<dyn BasketRepository>,
    deposits: Arc<dyn DepositRepository>,
    ledger: Ledger,
    audit: Arc<dyn AuditLogRepository>,
}

/// Retries `f` up to [`MAX_RETRIES`] times with a small linear backoff for
/// transient adapter errors; a permanent error stops immediately.
async fn with_retry<T, F, Fut>(mut f: F) -> Result<T, AdapterError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, AdapterError>>,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < MAX_RETRIES => {
                attempt += 1;
                warn!(attempt, %err, "transient brokerage error, retrying");
                sleep(RETRY_BACKOFF * attempt).await;
            }
            Err(err) => return Err(err),
        }
    }
}

impl BrokerageBridge {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        brokerage: Arc<dyn BrokerageAdapter>,
        brokerage_accounts: Arc<dyn BrokerageAccountRepository>,
        baskets: Arc<dyn BasketRepository>,
        deposits: Arc<dyn DepositRepository>,
        ledger: Ledger,
        audit: Arc<dyn AuditLogRepository>,
    ) -> Self {
        Self {
            brokerage,
            brokerage_accounts,
            baskets,
            deposits,
            ledger,
            audit,
        }
    }

    /// Periodically sweeps confirmed deposits awaiting broker funding and
    /// drives each through [`BrokerageBridge::fund_broker`]. This is the
    /// automatic trigger a deposit needs after allocation posts it: nothing
    /// else calls `fund_broker`.
    pub async fn run(self, config: BrokerageSweepConfig, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(config.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let started = Instant::now();
                    let funded = self.sweep_once(config.batch_size).await;
                    info!(funded, duration_ms = started.elapsed().as_millis() as i64, "brokerage funding sweep complete");
                }
                _ = shutdown.cancelled() => break,
            }
        }
        info!("brokerage funding sweep stopped");
    }

    /// Funds every deposit currently awaiting the broker, up to
    /// `batch_size`. Returns the number successfully funded; a failure on
    /// one deposit (already logged by [`BrokerageBridge::fail_deposit`])
    /// doesn't stop the rest of the batch.
    pub async fn sweep_once(&self, batch_size: i64) -> u64 {
        let deposits = match self.deposits.find_confirmed_awaiting_broker_funding(batch_size).await {
            Ok(deposits) => deposits,
            Err(err) => {
                warn!(%err, "failed to fetch deposits awaiting broker funding");
                return 0;
            }
        };

        let mut funded = 0;
        for deposit in &deposits {
            match self.fund_broker(deposit).await {
                Ok(()) => funded += 1,
                Err(err) => warn!(deposit_id = %deposit.id, %err, "brokerage funding attempt failed"),
            }
        }
        funded
    }

    async fn active_account(&self, user: UserId) -> Result<String, CoreError> {
        let account = self
            .brokerage_accounts
            .find_by_user(user)
            .await?
            .ok_or_else(|| CoreError::Validation(format!("no brokerage account for user {user}")))?;
        if !account.is_active() {
            return Err(CoreError::Validation(format!(
                "brokerage account for user {user} is not active"
            )));
        }
        Ok(account.account)
    }

    /// Funds the brokerage with a deposit's invest-pool share. The on-chain
    /// to USD conversion in the allocation path already is the off-ramp leg,
    /// so a `confirmed` deposit first advances to `off_ramp_completed` here
    /// before the brokerage call; on an accepted response the deposit
    /// advances to `broker_funded` and `invest_buffer` moves to
    /// `pending_investment`. Any failure — account inactive, validation, or a
    /// permanent adapter error after retries — marks the deposit `failed`
    /// and surfaces to the caller, which is responsible for notifying the
    /// user.
    pub async fn fund_broker(&self, deposit: &Deposit) -> Result<(), CoreError> {
        match deposit.status {
            DepositStatus::Confirmed => {
                self.deposits
                    .update_deposit_status(deposit.id, DepositStatus::OffRampCompleted, false, None, Some(Utc::now()))
                    .await?;
            }
            DepositStatus::OffRampCompleted => {}
            other => {
                return Err(CoreError::InvalidTransition {
                    from: format!("{other:?}"),
                    to: "broker_funded".to_string(),
                });
            }
        }

        let account = match self.active_account(deposit.user_id).await {
            Ok(account) => account,
            Err(err) => {
                self.fail_deposit(deposit.id, &err.to_string()).await;
                return Err(err);
            }
        };

        let (_, invest) = deposit.amount.split_70_30();
        // `source` is the adapter's only free-text field; it doubles as the
        // client-chosen idempotency key the broker dedupes retries on.
        let idempotency_key = format!("fund:{}", deposit.id);

        let result = with_retry(|| {
            self.brokerage
                .initiate_instant_funding(&account, &idempotency_key, invest)
        })
        .await;

        let result = match result {
            Ok(result) => result,
            Err(err) => {
                let reason = err.to_string();
                self.fail_deposit(deposit.id, &reason).await;
                funding_metrics::brokerage::record_funding_attempt("error");
                return Err(err.into());
            }
        };

        if !result.accepted {
            let reason = format!("brokerage rejected funding {}", result.funding_id);
            self.fail_deposit(deposit.id, &reason).await;
            funding_metrics::brokerage::record_funding_attempt("rejected");
            return Err(CoreError::Validation(reason));
        }
        funding_metrics::brokerage::record_funding_attempt("accepted");

        self.deposits
            .update_deposit_status(deposit.id, DepositStatus::BrokerFunded, false, None, Some(Utc::now()))
            .await?;

        self.ledger
            .post_transaction(
                deposit.user_id,
                TransactionType::Investment,
                Some(Uuid::from(deposit.id)),
                Some("deposit"),
                serde_json::json!({"funding_id": result.funding_id}),
                vec![
                    NewEntry::user(AccountType::InvestBuffer, deposit.user_id, EntryDirection::Debit, invest),
                    NewEntry::user(AccountType::PendingInvestment, deposit.user_id, EntryDirection::Credit, invest),
                ],
            )
            .await?;

        self.audit
            .log_best_effort(AuditLogEntry::system(
                "broker_funded",
                deposit.id.to_string(),
                serde_json::json!({"funding_id": result.funding_id, "amount": invest.to_string()}),
            ))
            .await;

        info!(deposit_id = %deposit.id, funding_id = %result.funding_id, "deposit broker-funded");
        Ok(())
    }

    async fn fail_deposit(&self, deposit_id: DepositId, reason: &str) {
        if let Err(err) = self
            .deposits
            .update_deposit_status(deposit_id, DepositStatus::Failed, false, Some(reason), None)
            .await
        {
            warn!(%err, %deposit_id, "failed to record broker-funding failure on deposit");
        }
        self.audit
            .log_best_effort(AuditLogEntry::system(
                "broker_funding_failed",
                deposit_id.to_string(),
                serde_json::json!({"reason": reason}),
            ))
            .await;
    }

    /// Fans a basket out into one sub-order per component, proportional to
    /// weight, skipping any whose proportional notional is below
    /// [`MIN_COMPONENT_NOTIONAL`]. Persists the basket registry before
    /// talking to the broker so a crash mid-fan-out leaves a recoverable
    /// trail.
    pub async fn place_basket_order(
        &self,
        user: UserId,
        deposit: Option<DepositId>,
        basket_ref: &str,
        components: &[BasketComponent],
        side: OrderSide,
        amount: Money,
    ) -> Result<(), CoreError> {
        let account = self.active_account(user).await?;
        let total_weight: Decimal = components.iter().map(|c| c.weight).sum();
        if total_weight <= Decimal::ZERO {
            return Err(CoreError::Validation("basket has no positive weight".to_string()));
        }

        let mut planned = Vec::new();
        for component in components {
            let share = amount.as_decimal() * component.weight / total_weight;
            if share < MIN_COMPONENT_NOTIONAL {
                info!(symbol = %component.symbol, %share, "skipping dust basket component");
                funding_metrics::brokerage::record_basket_component_skipped_as_dust(&component.symbol);
                continue;
            }
            planned.push((component.symbol.clone(), component.weight, share));
        }

        if planned.is_empty() {
            return Err(CoreError::Validation("every basket component rounds below minimum".to_string()));
        }

        let orders = planned
            .iter()
            .map(|(symbol, weight, share)| NewBasketOrder {
                basket_ref: basket_ref.to_string(),
                symbol: symbol.clone(),
                client_order_id: format!("{basket_ref}:{symbol}"),
                weight: *weight,
                amount: *share,
            })
            .collect();
        self.baskets
            .create_basket(basket_ref, user, deposit, &account, orders)
            .await?;

        for (symbol, _, share) in &planned {
            let client_order_id = format!("{basket_ref}:{symbol}");
            let result = with_retry(|| {
                self.brokerage.create_order(
                    &account,
                    symbol,
                    side,
                    OrderAmount::Notional(Money::new(*share)),
                    &client_order_id,
                )
            })
            .await;

            match result {
                Ok(order) => {
                    self.baskets
                        .set_broker_order_id(&client_order_id, &order.order_id)
                        .await?;
                    funding_metrics::brokerage::record_basket_order_submitted(symbol);
                }
                Err(err) => {
                    warn!(%err, %client_order_id, "basket sub-order failed");
                    self.baskets.set_basket_status(basket_ref, "failed").await?;
                    return Err(err.into());
                }
            }
        }

        self.baskets.set_basket_status(basket_ref, "submitted").await?;
        Ok(())
    }

    /// Reconciles every sub-order's live status from the broker and
    /// aggregates per spec: `filled` only if every leg filled, a canceled or
    /// rejected leg flips the aggregate to `partially_filled`, otherwise the
    /// aggregate reflects partial fills or remains `pending`.
    pub async fn get_order_status(&self, basket_ref: &str) -> Result<BasketOrderStatus, CoreError> {
        let meta = self.basket_meta(basket_ref).await?;
        let rows = self.baskets.list_orders(basket_ref).await?;

        let mut all_filled = true;
        let mut any_progress = false;
        let mut any_broken = false;
        let mut filled_qty = Decimal::ZERO;
        let mut notional = Decimal::ZERO;

        for row in rows {
            let Some(order_id) = row.broker_order_id.clone() else {
                all_filled = false;
                continue;
            };
            let order = self.brokerage.get_order(&meta.account, &order_id).await?;
            match order.status {
                OrderStatus::Filled => {
                    any_progress = true;
                }
                OrderStatus::PartiallyFilled => {
                    all_filled = false;
                    any_progress = true;
                }
                OrderStatus::Pending => {
                    all_filled = false;
                }
                OrderStatus::Canceled | OrderStatus::Rejected => {
                    all_filled = false;
                    any_broken = true;
                }
            }
            if order.filled_qty > Decimal::ZERO {
                filled_qty += order.filled_qty;
                if let Some(price) = order.avg_fill_price {
                    notional += order.filled_qty * price;
                }
            }
        }

        let status = if all_filled {
            AggregateStatus::Filled
        } else if any_broken || any_progress {
            AggregateStatus::PartiallyFilled
        } else {
            AggregateStatus::Pending
        };

        let avg_fill_price = if filled_qty > Decimal::ZERO {
            Some(notional / filled_qty)
        } else {
            None
        };

        Ok(BasketOrderStatus {
            basket_ref: basket_ref.to_string(),
            status,
            filled_qty,
            avg_fill_price,
        })
    }

    /// Best-effort cancellation of every sub-order; success only if all of
    /// them cancel.
    pub async fn cancel_basket(&self, basket_ref: &str) -> Result<(), CoreError> {
        let meta = self.basket_meta(basket_ref).await?;
        let rows = self.baskets.list_orders(basket_ref).await?;

        let mut all_ok = true;
        for row in rows {
            let Some(order_id) = row.broker_order_id else { continue };
            if let Err(err) = self.brokerage.cancel_order(&meta.account, &order_id).await {
                warn!(%err, %order_id, "basket sub-order cancellation failed");
                all_ok = false;
            }
        }

        self.baskets
            .set_basket_status(basket_ref, if all_ok { "canceled" } else { "cancel_failed" })
            .await?;

        funding_metrics::brokerage::record_basket_cancel(if all_ok { "canceled" } else { "cancel_failed" });

        if all_ok {
            Ok(())
        } else {
            Err(CoreError::Validation(format!("basket {basket_ref} did not fully cancel")))
        }
    }

    async fn basket_meta(&self, basket_ref: &str) -> Result<BasketMeta, CoreError> {
        self.baskets
            .find_basket(basket_ref)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("basket {basket_ref}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use funding_adapters::fake::FakeBrokerage;
    use funding_common::Chain;
    use funding_storage::memory::{InMemoryAuditLog, InMemoryBaskets, InMemoryBrokerageAccounts, InMemoryDeposits, InMemoryLedger};
    use rust_decimal_macros::dec;

    fn deposit(user: UserId, status: DepositStatus) -> Deposit {
        Deposit {
            id: DepositId::new(),
            user_id: user,
            chain: Chain::Ethereum,
            tx_hash: Some("0xabc".to_string()),
            provider_event_id: None,
            token_code: "USDC".to_string(),
            amount: Money::new(dec!(100.00)),
            source_address: Some("0xW".to_string()),
            destination_wallet_id: None,
            status,
            created_at: Utc::now(),
            confirmed_at: Some(Utc::now()),
            broker_funded_at: None,
            failure_reason: None,
        }
    }

    async fn bridge(brokerage: Arc<FakeBrokerage>) -> (BrokerageBridge, Arc<InMemoryBrokerageAccounts>, Arc<InMemoryDeposits>, Ledger) {
        let accounts = Arc::new(InMemoryBrokerageAccounts::new());
        let baskets = Arc::new(InMemoryBaskets::new());
        let deposits = Arc::new(InMemoryDeposits::new());
        let ledger = Ledger::new(Arc::new(InMemoryLedger::new()), None);
        let audit = Arc::new(InMemoryAuditLog::new());
        let bridge = BrokerageBridge::new(brokerage, accounts.clone(), baskets, deposits.clone(), ledger.clone(), audit);
        (bridge, accounts, deposits, ledger)
    }

    #[tokio::test]
    async fn fund_broker_without_active_account_fails_and_marks_deposit_failed() {
        let (bridge, _accounts, deposits, _ledger) = bridge(Arc::new(FakeBrokerage::new())).await;
        let user = UserId::new();
        let d = deposit(user, DepositStatus::Confirmed);
        deposits.insert_deposit(&d).await.unwrap();

        let err = bridge.fund_broker(&d).await.unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));

        let stored = deposits.find_by_id(d.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DepositStatus::Failed);
    }

    #[tokio::test]
    async fn fund_broker_happy_path_moves_invest_buffer_to_pending_investment() {
        let (bridge, accounts, deposits, ledger) = bridge(Arc::new(FakeBrokerage::new())).await;
        let user = UserId::new();
        accounts.set(user, "acct-1", "active");

        let d = deposit(user, DepositStatus::OffRampCompleted);
        deposits.insert_deposit(&d).await.unwrap();

        ledger
            .post_transaction(
                user,
                TransactionType::AllocationSplit,
                None,
                None,
                serde_json::json!({}),
                vec![NewEntry::user(AccountType::InvestBuffer, user, EntryDirection::Credit, Money::new(dec!(30.00)))],
            )
            .await
            .unwrap();

        bridge.fund_broker(&d).await.unwrap();

        let stored = deposits.find_by_id(d.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DepositStatus::BrokerFunded);

        let balances = ledger.get_balances(user).await.unwrap();
        assert_eq!(balances.invest_buffer, Money::ZERO);
        assert_eq!(balances.pending_investment, Money::new(dec!(30.00)));
    }

    #[tokio::test]
    async fn fund_broker_from_confirmed_advances_through_off_ramp_first() {
        let (bridge, accounts, deposits, _ledger) = bridge(Arc::new(FakeBrokerage::new())).await;
        let user = UserId::new();
        accounts.set(user, "acct-1", "active");

        let d = deposit(user, DepositStatus::Confirmed);
        deposits.insert_deposit(&d).await.unwrap();

        bridge.fund_broker(&d).await.unwrap();

        let stored = deposits.find_by_id(d.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DepositStatus::BrokerFunded);
    }

    #[tokio::test]
    async fn place_basket_order_skips_dust_components_and_fills_rest() {
        let broker = Arc::new(FakeBrokerage::new());
        let (bridge, accounts, _deposits, _ledger) = bridge(broker.clone()).await;
        let user = UserId::new();
        accounts.set(user, "acct-1", "active");

        let components = vec![
            BasketComponent { symbol: "AAA".to_string(), weight: dec!(99) },
            BasketComponent { symbol: "DUST".to_string(), weight: dec!(1) },
        ];
        bridge
            .place_basket_order(user, None, "basket-1", &components, OrderSide::Buy, Money::new(dec!(100.00)))
            .await
            .unwrap();

        let status = bridge.get_order_status("basket-1").await.unwrap();
        assert_eq!(status.status, AggregateStatus::Pending);

        broker.fill_order("basket-1:AAA", dec!(10), dec!(9.9));
        let status = bridge.get_order_status("basket-1").await.unwrap();
        assert_eq!(status.status, AggregateStatus::Filled);
        assert_eq!(status.filled_qty, dec!(10));
    }

    #[tokio::test]
    async fn sweep_once_funds_every_confirmed_deposit_in_the_batch() {
        let (bridge, accounts, deposits, _ledger) = bridge(Arc::new(FakeBrokerage::new())).await;
        let user = UserId::new();
        accounts.set(user, "acct-1", "active");

        let a = deposit(user, DepositStatus::Confirmed);
        let b = deposit(user, DepositStatus::OffRampCompleted);
        deposits.insert_deposit(&a).await.unwrap();
        deposits.insert_deposit(&b).await.unwrap();

        let funded = bridge.sweep_once(10).await;
        assert_eq!(funded, 2);

        for d in [&a, &b] {
            let stored = deposits.find_by_id(d.id).await.unwrap().unwrap();
            assert_eq!(stored.status, DepositStatus::BrokerFunded);
        }
    }

    #[tokio::test]
    async fn sweep_once_skips_deposits_not_awaiting_broker_funding() {
        let (bridge, _accounts, deposits, _ledger) = bridge(Arc::new(FakeBrokerage::new())).await;
        let user = UserId::new();
        let pending = deposit(user, DepositStatus::Pending);
        deposits.insert_deposit(&pending).await.unwrap();

        let funded = bridge.sweep_once(10).await;
        assert_eq!(funded, 0);
    }

    #[tokio::test]
    async fn cancel_basket_succeeds_only_if_every_leg_cancels() {
        let broker = Arc::new(FakeBrokerage::new());
        let (bridge, accounts, _deposits, _ledger) = bridge(broker.clone()).await;
        let user = UserId::new();
        accounts.set(user, "acct-1", "active");

        let components = vec![BasketComponent { symbol: "AAA".to_string(), weight: dec!(1) }];
        bridge
            .place_basket_order(user, None, "basket-2", &components, OrderSide::Buy, Money::new(dec!(50.00)))
            .await
            .unwrap();

        bridge.cancel_basket("basket-2").await.unwrap();
        let status = bridge.get_order_status("basket-2").await.unwrap();
        assert_eq!(status.status, AggregateStatus::PartiallyFilled);
    }
}
