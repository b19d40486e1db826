//! In-memory repository implementations for tests: every trait in this
//! crate also has a plain `Mutex<HashMap<..>>` implementation so downstream
//! crates can unit-test the core logic without a live Postgres instance.

use crate::audit::AuditLogRepository;
use crate::baskets::{BasketMeta, BasketOrderRow, BasketRepository, NewBasketOrder};
use crate::brokerage_account::{BrokerageAccount, BrokerageAccountRepository};
use crate::deposits::{DepositRepository, WalletRepository};
use crate::idempotency::{IdempotencyRecord, IdempotencyRepository};
use crate::jobs::{FundingEventJob, JobMetrics, JobRepository, NewFundingEventJob};
use crate::ledger::{Balances, LedgerRepository, LedgerTransactionRecord, NewEntry};
use crate::virtual_accounts::{NewVirtualAccount, VirtualAccountRepository};
use async_trait::async_trait;
use chrono::Utc;
use funding_common::{
    AuditLogEntry, Chain, CoreError, Deposit, DepositId, DepositStatus, JobId, JobStatus,
    LedgerTransactionId, Money, UserId, VirtualAccountId, VirtualAccountStatus, WalletId,
};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
pub struct InMemoryDeposits {
    by_id: Mutex<HashMap<Uuid, Deposit>>,
}

impl InMemoryDeposits {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DepositRepository for InMemoryDeposits {
    async fn insert_deposit(&self, deposit: &Deposit) -> Result<(), CoreError> {
        let mut map = self.by_id.lock().unwrap();
        let conflict = map.values().any(|d| match (&d.tx_hash, &deposit.tx_hash) {
            (Some(a), Some(b)) => a == b && d.chain.as_str() == deposit.chain.as_str(),
            _ => false,
        });
        if conflict {
            return Err(CoreError::Conflict(format!(
                "deposit for tx_hash {:?} already exists",
                deposit.tx_hash
            )));
        }
        map.insert(deposit.id.into(), deposit.clone());
        Ok(())
    }

    async fn update_deposit_status(
        &self,
        id: DepositId,
        new_status: DepositStatus,
        by_reconciliation: bool,
        failure_reason: Option<&str>,
        timestamp: Option<chrono::DateTime<Utc>>,
    ) -> Result<(), CoreError> {
        let mut map = self.by_id.lock().unwrap();
        let deposit = map
            .get_mut(&Uuid::from(id))
            .ok_or_else(|| CoreError::NotFound(format!("deposit {id}")))?;
        DepositStatus::validate_transition(deposit.status, new_status, by_reconciliation)?;
        deposit.status = new_status;
        deposit.failure_reason = failure_reason.map(str::to_string);
        let ts = timestamp.unwrap_or_else(Utc::now);
        match new_status {
            DepositStatus::Confirmed => deposit.confirmed_at = Some(ts),
            DepositStatus::BrokerFunded => deposit.broker_funded_at = Some(ts),
            _ => {}
        }
        Ok(())
    }

    async fn find_by_id(&self, id: DepositId) -> Result<Option<Deposit>, CoreError> {
        Ok(self.by_id.lock().unwrap().get(&Uuid::from(id)).cloned())
    }

    async fn find_by_tx_hash(&self, chain: Chain, tx_hash: &str) -> Result<Option<Deposit>, CoreError> {
        Ok(self
            .by_id
            .lock()
            .unwrap()
            .values()
            .find(|d| d.chain.as_str() == chain.as_str() && d.tx_hash.as_deref() == Some(tx_hash))
            .cloned())
    }

    async fn find_by_provider_event_id(&self, event_id: &str) -> Result<Option<Deposit>, CoreError> {
        Ok(self
            .by_id
            .lock()
            .unwrap()
            .values()
            .find(|d| d.provider_event_id.as_deref() == Some(event_id))
            .cloned())
    }

    async fn find_pending_older_than(
        &self,
        threshold: chrono::Duration,
        limit: i64,
    ) -> Result<Vec<Deposit>, CoreError> {
        let cutoff = Utc::now() - threshold;
        let mut matches: Vec<Deposit> = self
            .by_id
            .lock()
            .unwrap()
            .values()
            .filter(|d| d.status == DepositStatus::Pending && d.created_at <= cutoff)
            .cloned()
            .collect();
        matches.sort_by_key(|d| d.created_at);
        matches.truncate(limit as usize);
        Ok(matches)
    }

    async fn find_confirmed_awaiting_broker_funding(&self, limit: i64) -> Result<Vec<Deposit>, CoreError> {
        let mut matches: Vec<Deposit> = self
            .by_id
            .lock()
            .unwrap()
            .values()
            .filter(|d| matches!(d.status, DepositStatus::Confirmed | DepositStatus::OffRampCompleted))
            .cloned()
            .collect();
        matches.sort_by_key(|d| d.created_at);
        matches.truncate(limit as usize);
        Ok(matches)
    }
}

#[derive(Default)]
pub struct InMemoryWallets {
    by_user_chain: Mutex<HashMap<(Uuid, &'static str), (WalletId, String)>>,
    by_address: Mutex<HashMap<String, (WalletId, UserId)>>,
}

impl InMemoryWallets {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WalletRepository for InMemoryWallets {
    async fn get_or_create_wallet(
        &self,
        user: UserId,
        chain: Chain,
        address_fn: &(dyn Fn() -> String + Send + Sync),
    ) -> Result<(WalletId, String), CoreError> {
        let mut map = self.by_user_chain.lock().unwrap();
        if let Some(existing) = map.get(&(user.into(), chain.as_str())) {
            return Ok(existing.clone());
        }
        let wallet_id = WalletId::new();
        let address = address_fn();
        map.insert((user.into(), chain.as_str()), (wallet_id, address.clone()));
        self.by_address
            .lock()
            .unwrap()
            .insert(address.clone(), (wallet_id, user));
        Ok((wallet_id, address))
    }

    async fn find_by_address(&self, address: &str) -> Result<Option<(WalletId, UserId)>, CoreError> {
        Ok(self.by_address.lock().unwrap().get(address).copied())
    }
}

#[derive(Default)]
pub struct InMemoryLedger {
    // account_key -> signed balance
    balances: Mutex<HashMap<String, Decimal>>,
    transactions: Mutex<Vec<LedgerTransactionRecord>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn account_key(entry: &NewEntry) -> String {
        match entry.account_user {
            Some(user) => format!("{user}:{:?}", entry.account_type),
            None => format!("system:{:?}", entry.account_type),
        }
    }
}

#[async_trait]
impl LedgerRepository for InMemoryLedger {
    async fn post_transaction(
        &self,
        user: UserId,
        transaction_type: funding_common::TransactionType,
        reference_id: Option<Uuid>,
        _reference_type: Option<&str>,
        metadata: serde_json::Value,
        entries: Vec<NewEntry>,
    ) -> Result<LedgerTransactionId, CoreError> {
        let mut debits = Decimal::ZERO;
        let mut credits = Decimal::ZERO;
        for e in &entries {
            if !e.amount.is_positive() {
                return Err(CoreError::InvalidBalance {
                    debits: debits.to_string(),
                    credits: credits.to_string(),
                });
            }
            match e.direction {
                funding_common::EntryDirection::Debit => debits += e.amount.as_decimal(),
                funding_common::EntryDirection::Credit => credits += e.amount.as_decimal(),
            }
        }
        if debits != credits {
            return Err(CoreError::InvalidBalance {
                debits: debits.to_string(),
                credits: credits.to_string(),
            });
        }

        let mut balances = self.balances.lock().unwrap();
        for e in &entries {
            let key = Self::account_key(e);
            let signed = match e.direction {
                funding_common::EntryDirection::Credit => e.amount.as_decimal(),
                funding_common::EntryDirection::Debit => -e.amount.as_decimal(),
            };
            *balances.entry(key).or_insert(Decimal::ZERO) += signed;
        }

        let id = LedgerTransactionId::new();
        self.transactions.lock().unwrap().push(LedgerTransactionRecord {
            id,
            transaction_type,
            reference_id,
            metadata,
            created_at: Utc::now(),
        });
        let _ = user;
        Ok(id)
    }

    async fn get_balances(&self, user: UserId) -> Result<Balances, CoreError> {
        let balances = self.balances.lock().unwrap();
        let get = |ty: &str| {
            Money::new(
                *balances
                    .get(&format!("{user}:{ty}"))
                    .unwrap_or(&Decimal::ZERO),
            )
        };
        let usdc_balance = get("UsdcBalance");
        let fiat_exposure = get("FiatExposure");
        let pending_investment = get("PendingInvestment");
        let spend_buffer = get("SpendBuffer");
        let invest_buffer = get("InvestBuffer");
        Ok(Balances {
            usdc_balance,
            fiat_exposure,
            pending_investment,
            spend_buffer,
            invest_buffer,
            total_value: usdc_balance + fiat_exposure + pending_investment + spend_buffer + invest_buffer,
        })
    }

    async fn get_transactions(
        &self,
        user: UserId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<LedgerTransactionRecord>, CoreError> {
        let _ = user;
        let txs = self.transactions.lock().unwrap();
        Ok(txs
            .iter()
            .rev()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryJobs {
    jobs: Mutex<HashMap<Uuid, FundingEventJob>>,
}

impl InMemoryJobs {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobRepository for InMemoryJobs {
    async fn enqueue(&self, new_job: NewFundingEventJob) -> Result<FundingEventJob, CoreError> {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(existing) = jobs.values().find(|j| match (&j.tx_hash, &new_job.tx_hash) {
            (Some(a), Some(b)) => a == b && j.chain.as_str() == new_job.chain.as_str(),
            _ => {
                j.provider_event_id.is_some() && j.provider_event_id == new_job.provider_event_id
            }
        }) {
            return Ok(existing.clone());
        }
        let job = FundingEventJob {
            id: JobId::new(),
            deposit_id: None,
            chain: new_job.chain,
            tx_hash: new_job.tx_hash,
            provider_event_id: new_job.provider_event_id,
            token_code: new_job.token_code,
            amount: new_job.amount,
            to_address: new_job.to_address,
            block_time: new_job.block_time,
            first_seen_at: Utc::now(),
            next_retry_at: Utc::now(),
            attempt_count: 0,
            max_attempts: new_job.max_attempts,
            status: JobStatus::Pending,
            failure_reason: None,
            error_type: None,
            processing_log: Vec::new(),
            lease_expires_at: None,
        };
        jobs.insert(job.id.into(), job.clone());
        Ok(job)
    }

    async fn claim_next(&self, limit: i64, lease: chrono::Duration) -> Result<Vec<FundingEventJob>, CoreError> {
        let mut jobs = self.jobs.lock().unwrap();
        let now = Utc::now();
        for job in jobs.values_mut() {
            if job.status == JobStatus::Processing {
                if let Some(expires) = job.lease_expires_at {
                    if expires < now {
                        job.status = JobStatus::Pending;
                    }
                }
            }
        }
        let mut claimed = Vec::new();
        for job in jobs.values_mut() {
            if claimed.len() as i64 >= limit {
                break;
            }
            if job.status == JobStatus::Pending && job.next_retry_at <= now {
                job.status = JobStatus::Processing;
                job.lease_expires_at = Some(now + lease);
                claimed.push(job.clone());
            }
        }
        claimed.sort_by_key(|j| j.next_retry_at);
        Ok(claimed)
    }

    async fn update(&self, job: &FundingEventJob) -> Result<(), CoreError> {
        self.jobs.lock().unwrap().insert(job.id.into(), job.clone());
        Ok(())
    }

    async fn find_reconciliation_candidates(
        &self,
        threshold: chrono::Duration,
        limit: i64,
    ) -> Result<Vec<FundingEventJob>, CoreError> {
        let cutoff = Utc::now() - threshold;
        let mut matches: Vec<FundingEventJob> = self
            .jobs
            .lock()
            .unwrap()
            .values()
            .filter(|j| !j.status.is_terminal() && j.first_seen_at <= cutoff)
            .cloned()
            .collect();
        matches.sort_by_key(|j| j.first_seen_at);
        matches.truncate(limit as usize);
        Ok(matches)
    }

    async fn metrics(&self) -> Result<JobMetrics, CoreError> {
        let jobs = self.jobs.lock().unwrap();
        let total = jobs.len() as i64;
        let pending = jobs.values().filter(|j| j.status == JobStatus::Pending).count() as i64;
        let processing = jobs
            .values()
            .filter(|j| j.status == JobStatus::Processing)
            .count() as i64;
        let completed = jobs.values().filter(|j| j.status == JobStatus::Completed).count() as i64;
        let dlq_depth = jobs.values().filter(|j| j.status == JobStatus::Dlq).count() as i64;
        let avg_attempt_count = if total > 0 {
            jobs.values().map(|j| j.attempt_count as f64).sum::<f64>() / total as f64
        } else {
            0.0
        };
        Ok(JobMetrics {
            total,
            pending,
            processing,
            completed,
            dlq_depth,
            success_rate: if total > 0 { completed as f64 / total as f64 } else { 0.0 },
            avg_attempt_count,
            avg_latency_ms: 0.0,
        })
    }
}

#[derive(Default)]
pub struct InMemoryIdempotency {
    records: Mutex<HashMap<String, IdempotencyRecord>>,
}

impl InMemoryIdempotency {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdempotencyRepository for InMemoryIdempotency {
    async fn get(&self, key: &str) -> Result<Option<IdempotencyRecord>, CoreError> {
        Ok(self.records.lock().unwrap().get(key).cloned())
    }

    async fn put(&self, record: IdempotencyRecord) -> Result<(), CoreError> {
        let mut records = self.records.lock().unwrap();
        if records.contains_key(&record.key) {
            return Err(CoreError::Conflict(format!(
                "idempotency key {} already exists",
                record.key
            )));
        }
        records.insert(record.key.clone(), record);
        Ok(())
    }

    async fn reap_expired(&self) -> Result<u64, CoreError> {
        let now = Utc::now();
        let mut records = self.records.lock().unwrap();
        let before = records.len();
        records.retain(|_, r| r.expires_at > now);
        Ok((before - records.len()) as u64)
    }
}

#[derive(Default)]
pub struct InMemoryAuditLog {
    pub entries: Mutex<Vec<AuditLogEntry>>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditLogRepository for InMemoryAuditLog {
    async fn append(&self, entry: AuditLogEntry) -> Result<(), CoreError> {
        self.entries.lock().unwrap().push(entry);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryVirtualAccounts {
    by_user_currency: Mutex<HashMap<(Uuid, &'static str), VirtualAccountId>>,
    statuses: Mutex<HashMap<Uuid, VirtualAccountStatus>>,
}

impl InMemoryVirtualAccounts {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VirtualAccountRepository for InMemoryVirtualAccounts {
    async fn get_or_create(&self, new: NewVirtualAccount) -> Result<VirtualAccountId, CoreError> {
        let currency_key = match new.currency {
            funding_common::Currency::Usd => "usd",
            funding_common::Currency::Gbp => "gbp",
        };
        let mut map = self.by_user_currency.lock().unwrap();
        if let Some(existing) = map.get(&(new.user_id.into(), currency_key)) {
            return Ok(*existing);
        }
        let id = VirtualAccountId::new();
        map.insert((new.user_id.into(), currency_key), id);
        self.statuses.lock().unwrap().insert(id.into(), VirtualAccountStatus::Active);
        Ok(id)
    }

    async fn find_by_provider_id(
        &self,
        _provider_account_id: &str,
    ) -> Result<Option<(VirtualAccountId, UserId)>, CoreError> {
        Ok(None)
    }

    async fn set_status(
        &self,
        id: VirtualAccountId,
        status: VirtualAccountStatus,
    ) -> Result<(), CoreError> {
        self.statuses.lock().unwrap().insert(id.into(), status);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryBrokerageAccounts {
    by_user: Mutex<HashMap<Uuid, BrokerageAccount>>,
}

impl InMemoryBrokerageAccounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test hook: register an account (active by default).
    pub fn set(&self, user: UserId, account: &str, status: &str) {
        self.by_user.lock().unwrap().insert(
            user.into(),
            BrokerageAccount { account: account.to_string(), status: status.to_string() },
        );
    }
}

#[async_trait]
impl BrokerageAccountRepository for InMemoryBrokerageAccounts {
    async fn find_by_user(&self, user: UserId) -> Result<Option<BrokerageAccount>, CoreError> {
        Ok(self.by_user.lock().unwrap().get(&Uuid::from(user)).cloned())
    }
}

#[derive(Default)]
pub struct InMemoryBaskets {
    orders: Mutex<HashMap<String, Vec<BasketOrderRow>>>,
    statuses: Mutex<HashMap<String, String>>,
    meta: Mutex<HashMap<String, (UserId, Option<DepositId>, String)>>,
}

impl InMemoryBaskets {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BasketRepository for InMemoryBaskets {
    async fn create_basket(
        &self,
        basket_ref: &str,
        user: UserId,
        deposit: Option<DepositId>,
        account: &str,
        orders: Vec<NewBasketOrder>,
    ) -> Result<(), CoreError> {
        let rows = orders
            .into_iter()
            .map(|o| BasketOrderRow {
                symbol: o.symbol,
                client_order_id: o.client_order_id,
                broker_order_id: None,
                status: "pending".to_string(),
            })
            .collect();
        self.orders.lock().unwrap().insert(basket_ref.to_string(), rows);
        self.statuses
            .lock()
            .unwrap()
            .insert(basket_ref.to_string(), "pending".to_string());
        self.meta
            .lock()
            .unwrap()
            .insert(basket_ref.to_string(), (user, deposit, account.to_string()));
        Ok(())
    }

    async fn set_broker_order_id(
        &self,
        client_order_id: &str,
        broker_order_id: &str,
    ) -> Result<(), CoreError> {
        let mut orders = self.orders.lock().unwrap();
        for rows in orders.values_mut() {
            for row in rows.iter_mut() {
                if row.client_order_id == client_order_id {
                    row.broker_order_id = Some(broker_order_id.to_string());
                }
            }
        }
        Ok(())
    }

    async fn list_orders(&self, basket_ref: &str) -> Result<Vec<BasketOrderRow>, CoreError> {
        Ok(self.orders.lock().unwrap().get(basket_ref).cloned().unwrap_or_default())
    }

    async fn set_basket_status(&self, basket_ref: &str, status: &str) -> Result<(), CoreError> {
        self.statuses
            .lock()
            .unwrap()
            .insert(basket_ref.to_string(), status.to_string());
        Ok(())
    }

    async fn find_basket(&self, basket_ref: &str) -> Result<Option<BasketMeta>, CoreError> {
        let meta = self.meta.lock().unwrap().get(basket_ref).cloned();
        let status = self
            .statuses
            .lock()
            .unwrap()
            .get(basket_ref)
            .cloned()
            .unwrap_or_else(|| "pending".to_string());
        Ok(meta.map(|(user_id, deposit_id, account)| BasketMeta {
            user_id,
            deposit_id,
            account,
            status,
        }))
    }
}

#[cfg(test)]
mod ledger_conservation_tests {
    use super::*;
    use funding_common::{AccountType, EntryDirection};
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn balanced_entries_are_always_accepted_and_net_to_zero(
            cents in proptest::collection::vec(1i64..1_000_000, 1..20),
        ) {
            let user = UserId::new();
            let total: i64 = cents.iter().sum();
            let mut entries = vec![NewEntry {
                account_type: AccountType::SpendBuffer,
                account_user: Some(user),
                direction: EntryDirection::Debit,
                amount: Money::new(Decimal::new(total, 2)),
            }];
            for c in &cents {
                entries.push(NewEntry {
                    account_type: AccountType::InvestBuffer,
                    account_user: Some(user),
                    direction: EntryDirection::Credit,
                    amount: Money::new(Decimal::new(*c, 2)),
                });
            }

            let ledger = InMemoryLedger::new();
            let rt = tokio::runtime::Runtime::new().unwrap();
            let result = rt.block_on(ledger.post_transaction(
                user,
                funding_common::TransactionType::AllocationSplit,
                None,
                None,
                serde_json::json!({}),
                entries,
            ));
            prop_assert!(result.is_ok());

            let balances = rt.block_on(ledger.get_balances(user)).unwrap();
            // Every credit to invest_buffer is matched by an equal debit from
            // spend_buffer: the two signed balances must be exact negatives.
            prop_assert_eq!(balances.spend_buffer.as_decimal(), -balances.invest_buffer.as_decimal());
        }

        #[test]
        fn unbalanced_entries_are_always_rejected(
            debit_cents in 1i64..1_000_000,
            credit_cents in 1i64..1_000_000,
        ) {
            prop_assume!(debit_cents != credit_cents);
            let user = UserId::new();
            let entries = vec![
                NewEntry {
                    account_type: AccountType::SpendBuffer,
                    account_user: Some(user),
                    direction: EntryDirection::Debit,
                    amount: Money::new(Decimal::new(debit_cents, 2)),
                },
                NewEntry {
                    account_type: AccountType::InvestBuffer,
                    account_user: Some(user),
                    direction: EntryDirection::Credit,
                    amount: Money::new(Decimal::new(credit_cents, 2)),
                },
            ];

            let ledger = InMemoryLedger::new();
            let rt = tokio::runtime::Runtime::new().unwrap();
            let result = rt.block_on(ledger.post_transaction(
                user,
                funding_common::TransactionType::AllocationSplit,
                None,
                None,
                serde_json::json!({}),
                entries,
            ));
            prop_assert!(matches!(result, Err(CoreError::InvalidBalance { .. })));
        }
    }
}
