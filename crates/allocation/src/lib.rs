//! The entry point shared by the webhook processor and the reconciliation
//! engine: turns a validated on-chain (or replayed) deposit into ledger
//! postings, in two steps — a deposit transaction against the suspense
//! account, then the 70/30 allocation split — with every side effect after
//! the ledger write treated as best-effort.

pub mod limits;

pub use limits::{DepositLimits, NoopLimits};

use chrono::{DateTime, Utc};
use funding_adapters::{ChainCustodyAdapter, NotificationAdapter};
use funding_common::{
    AccountType, AuditLogEntry, Chain, CoreError, Deposit, DepositId, DepositStatus, EntryDirection,
    Money, TransactionType, UserId,
};
use funding_ledger::Ledger;
use funding_storage::{AuditLogRepository, DepositRepository, NewEntry, WalletRepository};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Newly processed: ledger postings were written.
    Processed(DepositId),
    /// Replay of an already-confirmed (chain, tx_hash): no new side effects.
    AlreadyProcessed(DepositId),
}

impl ProcessOutcome {
    pub fn deposit_id(&self) -> DepositId {
        match self {
            ProcessOutcome::Processed(id) | ProcessOutcome::AlreadyProcessed(id) => *id,
        }
    }
}

pub struct AllocationEngine {
    deposits: Arc<dyn DepositRepository>,
    wallets: Arc<dyn WalletRepository>,
    ledger: Ledger,
    audit: Arc<dyn AuditLogRepository>,
    chain_custody: Arc<dyn ChainCustodyAdapter>,
    notification: Arc<dyn NotificationAdapter>,
    limits: Arc<dyn DepositLimits>,
    min_deposit: Money,
    large_deposit_threshold: Money,
}

impl AllocationEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        deposits: Arc<dyn DepositRepository>,
        wallets: Arc<dyn WalletRepository>,
        ledger: Ledger,
        audit: Arc<dyn AuditLogRepository>,
        chain_custody: Arc<dyn ChainCustodyAdapter>,
        notification: Arc<dyn NotificationAdapter>,
        limits: Arc<dyn DepositLimits>,
        min_deposit: Money,
        large_deposit_threshold: Money,
    ) -> Self {
        Self {
            deposits,
            wallets,
            ledger,
            audit,
            chain_custody,
            notification,
            limits,
            min_deposit,
            large_deposit_threshold,
        }
    }

    /// The underlying ledger handle, for callers (workers, reconciliation,
    /// brokerage) that need to read balances without re-threading a second
    /// `Arc<dyn LedgerRepository>` through their own constructors.
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub async fn process_chain_deposit(
        &self,
        chain: Chain,
        tx_hash: &str,
        token: &str,
        amount: Money,
        address: &str,
        block_time: DateTime<Utc>,
    ) -> Result<ProcessOutcome, CoreError> {
        if amount.as_decimal() < self.min_deposit.as_decimal() {
            return Err(CoreError::Validation(format!(
                "deposit amount {amount} below minimum {}",
                self.min_deposit
            )));
        }

        let (is_valid, reason) = self.chain_custody.validate_deposit(tx_hash, amount).await?;
        if !is_valid {
            return Err(CoreError::Validation(format!("invalid deposit: {reason}")));
        }

        if let Some(existing) = self.deposits.find_by_tx_hash(chain, tx_hash).await? {
            return Ok(ProcessOutcome::AlreadyProcessed(existing.id));
        }

        let (wallet_id, user) = self
            .wallets
            .find_by_address(address)
            .await?
            .ok_or_else(|| CoreError::WalletNotFound(address.to_string()))?;

        // Round to the currency boundary once, here: every ledger entry
        // posted below derives from this value, so `debit == credit1 +
        // credit2` holds exactly regardless of how many fractional digits
        // the conversion produced.
        let usd = self.chain_custody.convert_to_usd(amount, token).await?.round_currency();

        self.limits.validate(user, usd).await?;

        let deposit_id = DepositId::new();
        let deposit = Deposit {
            id: deposit_id,
            user_id: user,
            chain,
            tx_hash: Some(tx_hash.to_string()),
            provider_event_id: None,
            token_code: token.to_string(),
            amount,
            source_address: Some(address.to_string()),
            destination_wallet_id: Some(wallet_id),
            status: DepositStatus::Pending,
            created_at: Utc::now(),
            confirmed_at: None,
            broker_funded_at: None,
            failure_reason: None,
        };
        match self.deposits.insert_deposit(&deposit).await {
            Ok(()) => {}
            Err(CoreError::Conflict(_)) => {
                // Lost the race to another worker inserting the same
                // (chain, tx_hash) between the find and the insert.
                let existing = self
                    .deposits
                    .find_by_tx_hash(chain, tx_hash)
                    .await?
                    .ok_or_else(|| CoreError::Conflict(format!("deposit for {tx_hash} vanished")))?;
                return Ok(ProcessOutcome::AlreadyProcessed(existing.id));
            }
            Err(err) => return Err(err),
        }

        self.deposits
            .update_deposit_status(deposit_id, DepositStatus::Confirmed, false, None, Some(block_time))
            .await?;

        self.ledger
            .post_transaction(
                user,
                TransactionType::Deposit,
                Some(Uuid::from(deposit_id)),
                Some("deposit"),
                serde_json::json!({"chain": chain.as_str(), "tx_hash": tx_hash}),
                vec![
                    NewEntry::system(AccountType::DepositSuspense, EntryDirection::Debit, usd),
                    NewEntry::user(AccountType::UsdcBalance, user, EntryDirection::Credit, usd),
                ],
            )
            .await?;

        let (spend, invest) = usd.split_70_30();
        let exact_invest = usd.as_decimal() * Decimal::new(30, 2);
        let residue_cents = ((invest.as_decimal() - exact_invest) * Decimal::new(100, 0))
            .abs()
            .to_f64()
            .unwrap_or(0.0);
        funding_metrics::ledger::record_split_residue_cents(residue_cents);
        self.ledger
            .post_transaction(
                user,
                TransactionType::AllocationSplit,
                Some(Uuid::from(deposit_id)),
                Some("deposit"),
                serde_json::json!({"spend": spend.to_string(), "invest": invest.to_string()}),
                vec![
                    NewEntry::user(AccountType::UsdcBalance, user, EntryDirection::Debit, usd),
                    NewEntry::user(AccountType::SpendBuffer, user, EntryDirection::Credit, spend),
                    NewEntry::user(AccountType::InvestBuffer, user, EntryDirection::Credit, invest),
                ],
            )
            .await?;

        self.limits.record_deposit(user, usd).await;

        self.audit
            .log_best_effort(AuditLogEntry::system(
                "deposit_processed",
                deposit_id.to_string(),
                serde_json::json!({"user": user.to_string(), "usd": usd.to_string()}),
            ))
            .await;

        if let Err(err) = self.notification.notify_deposit_confirmed(user, deposit_id).await {
            warn!(%err, %deposit_id, "deposit-confirmed notification failed, continuing");
        }

        if usd.as_decimal() >= self.large_deposit_threshold.as_decimal() {
            if let Err(err) = self.notification.notify_large_balance_change(user, usd).await {
                warn!(%err, %deposit_id, "large-balance-change notification failed, continuing");
            }
        }

        info!(%deposit_id, %chain, %usd, "deposit processed");
        Ok(ProcessOutcome::Processed(deposit_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use funding_adapters::fake::{FakeChainCustody, FakeNotificationAdapter};
    use funding_storage::memory::{InMemoryAuditLog, InMemoryDeposits, InMemoryLedger, InMemoryWallets};
    use rust_decimal_macros::dec;

    async fn engine_with(
        chain_custody: Arc<FakeChainCustody>,
    ) -> (AllocationEngine, Arc<InMemoryWallets>, UserId, String) {
        let deposits = Arc::new(InMemoryDeposits::new());
        let wallets = Arc::new(InMemoryWallets::new());
        let ledger = Ledger::new(Arc::new(InMemoryLedger::new()), None);
        let audit = Arc::new(InMemoryAuditLog::new());
        let notification = Arc::new(FakeNotificationAdapter::default());
        let limits = Arc::new(NoopLimits);

        let user = UserId::new();
        let (_, address) = wallets
            .get_or_create_wallet(user, Chain::Ethereum, &|| "0xW".to_string())
            .await
            .unwrap();

        let engine = AllocationEngine::new(
            deposits,
            wallets.clone(),
            ledger,
            audit,
            chain_custody,
            notification,
            limits,
            Money::new(dec!(1.00)),
            Money::new(dec!(10000.00)),
        );
        (engine, wallets, user, address)
    }

    #[tokio::test]
    async fn happy_path_splits_70_30() {
        let custody = Arc::new(FakeChainCustody::new());
        let (engine, wallets, user, address) = engine_with(custody).await;

        let outcome = engine
            .process_chain_deposit(Chain::Ethereum, "0xabc", "USDC", Money::new(dec!(100.00)), &address, Utc::now())
            .await
            .unwrap();
        assert!(matches!(outcome, ProcessOutcome::Processed(_)));

        let balances = engine.ledger.get_balances(user).await.unwrap();
        assert_eq!(balances.usdc_balance, Money::ZERO);
        assert_eq!(balances.spend_buffer, Money::new(dec!(70.00)));
        assert_eq!(balances.invest_buffer, Money::new(dec!(30.00)));
        let _ = wallets;
    }

    #[tokio::test]
    async fn duplicate_webhook_is_idempotent() {
        let custody = Arc::new(FakeChainCustody::new());
        let (engine, _wallets, user, address) = engine_with(custody).await;

        let first = engine
            .process_chain_deposit(Chain::Ethereum, "0xabc", "USDC", Money::new(dec!(100.00)), &address, Utc::now())
            .await
            .unwrap();
        let second = engine
            .process_chain_deposit(Chain::Ethereum, "0xabc", "USDC", Money::new(dec!(100.00)), &address, Utc::now())
            .await
            .unwrap();

        assert_eq!(first.deposit_id(), second.deposit_id());
        assert!(matches!(second, ProcessOutcome::AlreadyProcessed(_)));

        let balances = engine.ledger.get_balances(user).await.unwrap();
        assert_eq!(balances.spend_buffer, Money::new(dec!(70.00)));
        assert_eq!(balances.invest_buffer, Money::new(dec!(30.00)));
    }

    #[tokio::test]
    async fn below_minimum_is_rejected_before_any_write() {
        let custody = Arc::new(FakeChainCustody::new());
        let (engine, _wallets, _user, address) = engine_with(custody).await;

        let err = engine
            .process_chain_deposit(Chain::Ethereum, "0xdef", "USDC", Money::new(dec!(0.01)), &address, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[tokio::test]
    async fn high_precision_conversion_still_balances() {
        let custody = Arc::new(FakeChainCustody::new());
        // A conversion rate that doesn't land on a whole cent: the deposit
        // and split transactions must still post without InvalidBalance.
        custody.push_convert(Ok(Money::new(dec!(99.9873))));
        let (engine, _wallets, user, address) = engine_with(custody).await;

        let outcome = engine
            .process_chain_deposit(Chain::Ethereum, "0xabc", "USDC", Money::new(dec!(100.00)), &address, Utc::now())
            .await
            .unwrap();
        assert!(matches!(outcome, ProcessOutcome::Processed(_)));

        let balances = engine.ledger.get_balances(user).await.unwrap();
        assert_eq!(balances.usdc_balance, Money::ZERO);
        assert_eq!(balances.spend_buffer + balances.invest_buffer, Money::new(dec!(99.99)));
    }

    #[tokio::test]
    async fn unknown_wallet_address_fails_wallet_not_found() {
        let custody = Arc::new(FakeChainCustody::new());
        let (engine, _wallets, _user, _address) = engine_with(custody).await;

        let err = engine
            .process_chain_deposit(Chain::Ethereum, "0xabc", "USDC", Money::new(dec!(100.00)), "0xUNKNOWN", Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::WalletNotFound(_)));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn transient_convert_failure_then_recovery_matches_happy_path() {
        let custody = Arc::new(FakeChainCustody::new());
        custody.push_convert(Err(funding_adapters::AdapterError::Transient("rpc timeout".to_string())));
        custody.push_convert(Err(funding_adapters::AdapterError::Transient("rpc timeout".to_string())));
        custody.push_convert(Ok(Money::new(dec!(100.00))));
        let (engine, _wallets, user, address) = engine_with(custody).await;

        for _ in 0..2 {
            let err = engine
                .process_chain_deposit(Chain::Ethereum, "0xabc", "USDC", Money::new(dec!(100.00)), &address, Utc::now())
                .await
                .unwrap_err();
            assert!(matches!(err, CoreError::AdapterTransient(_)));
        }
        let outcome = engine
            .process_chain_deposit(Chain::Ethereum, "0xabc", "USDC", Money::new(dec!(100.00)), &address, Utc::now())
            .await
            .unwrap();
        assert!(matches!(outcome, ProcessOutcome::Processed(_)));

        let balances = engine.ledger.get_balances(user).await.unwrap();
        assert_eq!(balances.spend_buffer, Money::new(dec!(70.00)));
        assert_eq!(balances.invest_buffer, Money::new(dec!(30.00)));
    }
}
