//! Stale-deposit sweep: periodically asks each chain's validator about
//! funding-event jobs that are old enough to be suspicious, and resolves
//! them — confirmed transactions are replayed through the allocation
//! engine, failed/not-found ones are written off, everything else waits
//! for the next tick.

use funding_allocation::AllocationEngine;
use funding_chain_validator::{ChainValidator, TransactionStatus};
use funding_common::{AuditLogEntry, Chain, CoreError, Deposit, DepositId, DepositStatus};
use funding_jobqueue::JobQueue;
use funding_storage::{AuditLogRepository, DepositRepository, FundingEventJob, WalletRepository};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy)]
pub struct ReconciliationConfig {
    pub interval: Duration,
    pub threshold: chrono::Duration,
    pub not_found_grace: chrono::Duration,
    pub batch_size: i64,
    pub concurrency: usize,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(600),
            threshold: chrono::Duration::minutes(15),
            not_found_grace: chrono::Duration::hours(1),
            batch_size: 100,
            concurrency: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TickMetrics {
    pub candidates: usize,
    pub recovered: u64,
    pub failed: u64,
    pub duration_ms: i64,
}

pub struct ReconciliationEngine {
    queue: JobQueue,
    deposits: Arc<dyn DepositRepository>,
    wallets: Arc<dyn WalletRepository>,
    allocation: Arc<AllocationEngine>,
    audit: Arc<dyn AuditLogRepository>,
    validators: HashMap<Chain, Arc<dyn ChainValidator>>,
    config: ReconciliationConfig,
}

impl ReconciliationEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: JobQueue,
        deposits: Arc<dyn DepositRepository>,
        wallets: Arc<dyn WalletRepository>,
        allocation: Arc<AllocationEngine>,
        audit: Arc<dyn AuditLogRepository>,
        validators: HashMap<Chain, Arc<dyn ChainValidator>>,
        config: ReconciliationConfig,
    ) -> Self {
        Self { queue, deposits, wallets, allocation, audit, validators, config }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let metrics = self.run_once().await;
                    info!(
                        candidates = metrics.candidates,
                        recovered = metrics.recovered,
                        failed = metrics.failed,
                        duration_ms = metrics.duration_ms,
                        "reconciliation tick complete"
                    );
                }
                _ = shutdown.cancelled() => break,
            }
        }
        info!("reconciliation engine stopped");
    }

    pub async fn run_once(&self) -> TickMetrics {
        let started = Instant::now();
        let candidates = match self.queue.find_reconciliation_candidates(self.config.threshold, self.config.batch_size).await {
            Ok(candidates) => candidates,
            Err(err) => {
                warn!(%err, "failed to fetch reconciliation candidates");
                return TickMetrics { duration_ms: started.elapsed().as_millis() as i64, ..Default::default() };
            }
        };

        funding_metrics::reconciliation::record_candidate_queue_depth(candidates.len() as u64);

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut tasks = JoinSet::new();
        for job in candidates.clone() {
            let permit = semaphore.clone().acquire_owned().await.expect("semaphore never closed");
            let validator = job.tx_hash.as_ref().and_then(|_| self.validators.get(&job.chain).cloned());
            let queue = self.queue.clone();
            let deposits = self.deposits.clone();
            let wallets = self.wallets.clone();
            let allocation = self.allocation.clone();
            let audit = self.audit.clone();
            let config = self.config;
            tasks.spawn(async move {
                let _permit = permit;
                reconcile_one(job, validator, queue, deposits, wallets, allocation, audit, config).await
            });
        }

        let mut recovered = 0u64;
        let mut failed = 0u64;
        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(Decision::Recovered) => recovered += 1,
                Ok(Decision::Failed) => failed += 1,
                Ok(Decision::Skipped) => {}
                Err(err) => warn!(%err, "reconciliation task panicked"),
            }
        }

        let skipped = (candidates.len() as u64).saturating_sub(recovered).saturating_sub(failed);
        funding_metrics::reconciliation::record_tick(recovered, failed, skipped);

        TickMetrics {
            candidates: candidates.len(),
            recovered,
            failed,
            duration_ms: started.elapsed().as_millis() as i64,
        }
    }
}

enum Decision {
    Recovered,
    Failed,
    Skipped,
}

async fn reconcile_one(
    job: FundingEventJob,
    validator: Option<Arc<dyn ChainValidator>>,
    queue: JobQueue,
    deposits: Arc<dyn DepositRepository>,
    wallets: Arc<dyn WalletRepository>,
    allocation: Arc<AllocationEngine>,
    audit: Arc<dyn AuditLogRepository>,
    config: ReconciliationConfig,
) -> Decision {
    let Some(tx_hash) = job.tx_hash.clone() else {
        return Decision::Skipped;
    };
    let Some(validator) = validator else {
        return Decision::Skipped;
    };

    match validator.validate_transaction(&tx_hash).await {
        TransactionStatus::Confirmed => {
            let mut job = job;
            match allocation
                .process_chain_deposit(job.chain, &tx_hash, &job.token_code, job.amount, &job.to_address, job.block_time)
                .await
            {
                Ok(outcome) => {
                    let deposit_id = outcome.deposit_id();
                    if let Err(err) = queue
                        .record_success(&mut job, 0, serde_json::json!({"source": "reconciliation"}))
                        .await
                    {
                        warn!(%err, job_id = %job.id, "failed to persist reconciled job completion");
                    }
                    audit
                        .log_best_effort(AuditLogEntry::system(
                            "reconciliation_confirmed",
                            deposit_id.to_string(),
                            serde_json::json!({"job_id": job.id.to_string(), "tx_hash": tx_hash}),
                        ))
                        .await;
                    Decision::Recovered
                }
                Err(err) => {
                    warn!(%err, job_id = %job.id, "reconciliation-driven replay failed, will retry next tick");
                    Decision::Skipped
                }
            }
        }
        TransactionStatus::Failed => {
            fail_job(&job, "transaction_failed_on_chain", &queue, &deposits, &wallets, &audit).await;
            Decision::Failed
        }
        TransactionStatus::NotFound => {
            if job_age(&job) > config.not_found_grace {
                fail_job(&job, "transaction_not_found", &queue, &deposits, &wallets, &audit).await;
                Decision::Failed
            } else {
                Decision::Skipped
            }
        }
        TransactionStatus::Pending => Decision::Skipped,
    }
}

fn job_age(job: &FundingEventJob) -> chrono::Duration {
    chrono::Utc::now() - job.first_seen_at
}

async fn fail_job(
    job: &FundingEventJob,
    reason: &str,
    queue: &JobQueue,
    deposits: &Arc<dyn DepositRepository>,
    wallets: &Arc<dyn WalletRepository>,
    audit: &Arc<dyn AuditLogRepository>,
) {
    let mut job = job.clone();
    if let Err(err) = queue.mark_failed(&mut job, reason).await {
        warn!(%err, job_id = %job.id, "failed to mark job failed");
    }

    match fail_or_create_deposit(job.deposit_id, &job, reason, deposits, wallets).await {
        Ok(Some(deposit_id)) => {
            audit
                .log_best_effort(AuditLogEntry::system(
                    "reconciliation_failed",
                    deposit_id.to_string(),
                    serde_json::json!({"job_id": job.id.to_string(), "reason": reason}),
                ))
                .await;
        }
        Ok(None) => {
            // No deposit existed and no registered wallet claims the
            // destination address: nothing to write off beyond the job
            // itself, which is already marked failed above.
            audit
                .log_best_effort(AuditLogEntry::system(
                    "reconciliation_failed",
                    job.id.to_string(),
                    serde_json::json!({"reason": reason, "deposit": "none"}),
                ))
                .await;
        }
        Err(err) => warn!(%err, job_id = %job.id, "failed to record failed deposit"),
    }
}

/// Writes off a deposit as failed, creating the row first if the webhook
/// never produced one (the lost-delivery case: a job exists, no deposit
/// does). Returns `None` when there is no deposit to write off and the
/// destination address doesn't resolve to a known wallet, so no deposit
/// can legitimately be created.
async fn fail_or_create_deposit(
    deposit_id: Option<DepositId>,
    job: &FundingEventJob,
    reason: &str,
    deposits: &Arc<dyn DepositRepository>,
    wallets: &Arc<dyn WalletRepository>,
) -> Result<Option<DepositId>, CoreError> {
    if let Some(id) = deposit_id {
        deposits
            .update_deposit_status(id, DepositStatus::Failed, true, Some(reason), None)
            .await?;
        return Ok(Some(id));
    }
    if let Some(existing) = deposits.find_by_tx_hash(job.chain, job.tx_hash.as_deref().unwrap_or_default()).await? {
        deposits
            .update_deposit_status(existing.id, DepositStatus::Failed, true, Some(reason), None)
            .await?;
        return Ok(Some(existing.id));
    }

    let Some((wallet_id, user)) = wallets.find_by_address(&job.to_address).await? else {
        return Ok(None);
    };

    let id = DepositId::new();
    let placeholder = Deposit {
        id,
        user_id: user,
        chain: job.chain,
        tx_hash: job.tx_hash.clone(),
        provider_event_id: job.provider_event_id.clone(),
        token_code: job.token_code.clone(),
        amount: job.amount,
        source_address: Some(job.to_address.clone()),
        destination_wallet_id: Some(wallet_id),
        status: DepositStatus::Failed,
        created_at: job.first_seen_at,
        confirmed_at: None,
        broker_funded_at: None,
        failure_reason: Some(reason.to_string()),
    };
    match deposits.insert_deposit(&placeholder).await {
        Ok(()) => Ok(Some(id)),
        Err(CoreError::Conflict(_)) => {
            let existing = deposits
                .find_by_tx_hash(job.chain, job.tx_hash.as_deref().unwrap_or_default())
                .await?
                .map(|d| d.id);
            Ok(existing)
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use funding_adapters::fake::{FakeChainCustody, FakeNotificationAdapter};
    use funding_allocation::NoopLimits;
    use funding_common::{Money, UserId};
    use funding_jobqueue::RetryPolicy;
    use funding_ledger::Ledger;
    use funding_storage::memory::{InMemoryAuditLog, InMemoryDeposits, InMemoryJobs, InMemoryLedger, InMemoryWallets};
    use funding_storage::NewFundingEventJob;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;
    use std::time::Duration as StdDuration;

    struct ScriptedValidator(Mutex<TransactionStatus>);

    #[async_trait]
    impl ChainValidator for ScriptedValidator {
        async fn validate_transaction(&self, _tx_hash: &str) -> TransactionStatus {
            *self.0.lock().unwrap()
        }
    }

    async fn harness(
        validator_status: TransactionStatus,
    ) -> (ReconciliationEngine, JobQueue, Arc<InMemoryWallets>, Arc<AllocationEngine>, UserId, String) {
        let wallets = Arc::new(InMemoryWallets::new());
        let user = UserId::new();
        let (_, address) = wallets
            .get_or_create_wallet(user, Chain::Ethereum, &|| "0xW".to_string())
            .await
            .unwrap();

        let deposits = Arc::new(InMemoryDeposits::new());
        let audit = Arc::new(InMemoryAuditLog::new());
        let allocation = Arc::new(AllocationEngine::new(
            deposits.clone(),
            wallets.clone(),
            Ledger::new(Arc::new(InMemoryLedger::new()), None),
            audit.clone(),
            Arc::new(FakeChainCustody::new()),
            Arc::new(FakeNotificationAdapter::default()),
            Arc::new(NoopLimits),
            Money::new(dec!(1.00)),
            Money::new(dec!(10000.00)),
        ));
        let queue = JobQueue::new(
            Arc::new(InMemoryJobs::new()),
            RetryPolicy::new(StdDuration::from_millis(10), StdDuration::from_millis(100), 5),
        );

        let mut validators: HashMap<Chain, Arc<dyn ChainValidator>> = HashMap::new();
        validators.insert(Chain::Ethereum, Arc::new(ScriptedValidator(Mutex::new(validator_status))));

        let config = ReconciliationConfig {
            interval: StdDuration::from_secs(600),
            threshold: chrono::Duration::minutes(15),
            not_found_grace: chrono::Duration::hours(1),
            batch_size: 100,
            concurrency: 10,
        };
        let engine = ReconciliationEngine::new(queue.clone(), deposits, wallets.clone(), allocation.clone(), audit, validators, config);
        (engine, queue, wallets, allocation, user, address)
    }

    #[tokio::test]
    async fn confirmed_transaction_is_replayed_through_allocation() {
        let wallets = Arc::new(InMemoryWallets::new());
        let user = UserId::new();
        let (_, address) = wallets
            .get_or_create_wallet(user, Chain::Ethereum, &|| "0xW".to_string())
            .await
            .unwrap();

        let deposits = Arc::new(InMemoryDeposits::new());
        let audit = Arc::new(InMemoryAuditLog::new());
        let allocation = Arc::new(AllocationEngine::new(
            deposits.clone(),
            wallets.clone(),
            Ledger::new(Arc::new(InMemoryLedger::new()), None),
            audit.clone(),
            Arc::new(FakeChainCustody::new()),
            Arc::new(FakeNotificationAdapter::default()),
            Arc::new(NoopLimits),
            Money::new(dec!(1.00)),
            Money::new(dec!(10000.00)),
        ));
        let queue = JobQueue::new(
            Arc::new(InMemoryJobs::new()),
            RetryPolicy::new(StdDuration::from_millis(10), StdDuration::from_millis(100), 5),
        );
        queue
            .enqueue(NewFundingEventJob {
                chain: Chain::Ethereum,
                tx_hash: Some("0xrecover".to_string()),
                provider_event_id: None,
                token_code: "USDC".to_string(),
                amount: Money::new(dec!(100.00)),
                to_address: address,
                block_time: chrono::Utc::now() - chrono::Duration::minutes(20),
                max_attempts: 5,
            })
            .await
            .unwrap();

        // `threshold: zero()` makes the job a candidate immediately; the
        // in-memory repository stamps `first_seen_at = now()` on enqueue
        // with no way to backdate it from outside the crate.
        let mut validators: HashMap<Chain, Arc<dyn ChainValidator>> = HashMap::new();
        validators.insert(Chain::Ethereum, Arc::new(ScriptedValidator(Mutex::new(TransactionStatus::Confirmed))));
        let config = ReconciliationConfig { threshold: chrono::Duration::zero(), ..ReconciliationConfig::default() };
        let engine = ReconciliationEngine::new(queue.clone(), deposits, wallets, allocation.clone(), audit, validators, config);

        let metrics = engine.run_once().await;
        assert_eq!(metrics.recovered, 1);

        let balances = allocation.ledger().get_balances(user).await.unwrap();
        assert_eq!(balances.spend_buffer, Money::new(dec!(70.00)));
        assert_eq!(balances.invest_buffer, Money::new(dec!(30.00)));
    }

    #[tokio::test]
    async fn not_found_within_grace_period_is_skipped() {
        let (_engine, queue, _wallets, _allocation, _user, address) =
            harness(TransactionStatus::NotFound).await;
        queue
            .enqueue(NewFundingEventJob {
                chain: Chain::Ethereum,
                tx_hash: Some("0xnotfound".to_string()),
                provider_event_id: None,
                token_code: "USDC".to_string(),
                amount: Money::new(dec!(100.00)),
                to_address: address,
                block_time: chrono::Utc::now(),
                max_attempts: 5,
            })
            .await
            .unwrap();

        let mut config = ReconciliationConfig::default();
        config.threshold = chrono::Duration::zero();
        let engine = ReconciliationEngine::new(
            queue.clone(),
            Arc::new(InMemoryDeposits::new()),
            _wallets,
            _allocation,
            Arc::new(InMemoryAuditLog::new()),
            {
                let mut v: HashMap<Chain, Arc<dyn ChainValidator>> = HashMap::new();
                v.insert(Chain::Ethereum, Arc::new(ScriptedValidator(Mutex::new(TransactionStatus::NotFound))));
                v
            },
            config,
        );
        let metrics = engine.run_once().await;
        assert_eq!(metrics.recovered, 0);
        assert_eq!(metrics.failed, 0);
    }

    #[tokio::test]
    async fn failed_on_chain_writes_off_the_deposit_and_the_job() {
        let wallets = Arc::new(InMemoryWallets::new());
        let user = UserId::new();
        let (_, address) = wallets
            .get_or_create_wallet(user, Chain::Ethereum, &|| "0xW".to_string())
            .await
            .unwrap();

        let deposits = Arc::new(InMemoryDeposits::new());
        let audit = Arc::new(InMemoryAuditLog::new());
        let allocation = Arc::new(AllocationEngine::new(
            deposits.clone(),
            wallets.clone(),
            Ledger::new(Arc::new(InMemoryLedger::new()), None),
            audit.clone(),
            Arc::new(FakeChainCustody::new()),
            Arc::new(FakeNotificationAdapter::default()),
            Arc::new(NoopLimits),
            Money::new(dec!(1.00)),
            Money::new(dec!(10000.00)),
        ));
        let queue = JobQueue::new(
            Arc::new(InMemoryJobs::new()),
            RetryPolicy::new(StdDuration::from_millis(10), StdDuration::from_millis(100), 5),
        );
        queue
            .enqueue(NewFundingEventJob {
                chain: Chain::Ethereum,
                tx_hash: Some("0xfailed".to_string()),
                provider_event_id: None,
                token_code: "USDC".to_string(),
                amount: Money::new(dec!(100.00)),
                to_address: address,
                block_time: chrono::Utc::now(),
                max_attempts: 5,
            })
            .await
            .unwrap();

        let mut validators: HashMap<Chain, Arc<dyn ChainValidator>> = HashMap::new();
        validators.insert(Chain::Ethereum, Arc::new(ScriptedValidator(Mutex::new(TransactionStatus::Failed))));
        let config = ReconciliationConfig { threshold: chrono::Duration::zero(), ..ReconciliationConfig::default() };
        let engine = ReconciliationEngine::new(queue.clone(), deposits.clone(), wallets, allocation, audit, validators, config);

        let metrics = engine.run_once().await;
        assert_eq!(metrics.failed, 1);

        let deposit = deposits.find_by_tx_hash(Chain::Ethereum, "0xfailed").await.unwrap().unwrap();
        assert_eq!(deposit.status, DepositStatus::Failed);
        assert_eq!(deposit.failure_reason.as_deref(), Some("transaction_failed_on_chain"));

        let remaining = queue.find_reconciliation_candidates(chrono::Duration::zero(), 10).await.unwrap();
        assert!(remaining.is_empty(), "a failed job must not be reselected as a candidate");
    }
}
