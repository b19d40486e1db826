//! Webhook event worker pool: a fixed number of workers that repeatedly
//! claim a batch of funding-event jobs, hand each one to the allocation
//! engine in sequence, and record the outcome back onto the job queue —
//! success, scheduled retry, or dead-letter.

mod circuit_breaker;

pub use circuit_breaker::CircuitBreaker;

use funding_allocation::AllocationEngine;
use funding_common::ErrorType;
use funding_jobqueue::JobQueue;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy)]
pub struct ProcessorConfig {
    pub worker_count: usize,
    pub poll_interval: Duration,
    pub job_lease: chrono::Duration,
    pub circuit_threshold: u32,
    pub circuit_timeout: Duration,
}

/// Runs `worker_count` independent claim loops against the same job queue.
/// Each worker owns its own circuit breaker: one chain's RPC provider
/// tripping a breaker doesn't stop workers that happen to be claiming jobs
/// for a healthy chain, since jobs aren't partitioned by worker.
pub struct WebhookProcessor {
    queue: JobQueue,
    allocation: Arc<AllocationEngine>,
    config: ProcessorConfig,
}

impl WebhookProcessor {
    pub fn new(queue: JobQueue, allocation: Arc<AllocationEngine>, config: ProcessorConfig) -> Self {
        Self { queue, allocation, config }
    }

    /// Spawns the worker pool and returns once every worker has exited,
    /// which happens only after `shutdown` is cancelled and each worker
    /// finishes the job it was mid-flight on.
    pub async fn run(self, shutdown: CancellationToken) {
        let handles: Vec<JoinHandle<()>> = (0..self.config.worker_count.max(1))
            .map(|index| {
                let queue = self.queue.clone();
                let allocation = self.allocation.clone();
                let config = self.config;
                let shutdown = shutdown.clone();
                tokio::task::spawn(async move {
                    worker_loop(index, queue, allocation, config, shutdown).await;
                })
            })
            .collect();

        for handle in handles {
            if let Err(err) = handle.await {
                warn!(%err, "webhook worker task panicked");
            }
        }
        info!("webhook processor stopped");
    }
}

async fn worker_loop(
    index: usize,
    queue: JobQueue,
    allocation: Arc<AllocationEngine>,
    config: ProcessorConfig,
    shutdown: CancellationToken,
) {
    let breaker = CircuitBreaker::new(config.circuit_threshold, config.circuit_timeout);
    info!(worker = index, "webhook worker started");

    loop {
        if shutdown.is_cancelled() {
            break;
        }

        if !breaker.allow_request() {
            tokio::select! {
                _ = tokio::time::sleep(config.poll_interval) => {}
                _ = shutdown.cancelled() => break,
            }
            continue;
        }

        let claimed = tokio::select! {
            result = queue.claim_next(1, config.job_lease) => result,
            _ = shutdown.cancelled() => break,
        };

        let mut jobs = match claimed {
            Ok(jobs) => jobs,
            Err(err) => {
                warn!(worker = index, %err, "failed to claim jobs");
                tokio::select! {
                    _ = tokio::time::sleep(config.poll_interval) => {}
                    _ = shutdown.cancelled() => break,
                }
                continue;
            }
        };

        let Some(job) = jobs.pop() else {
            tokio::select! {
                _ = tokio::time::sleep(config.poll_interval) => {}
                _ = shutdown.cancelled() => break,
            }
            continue;
        };

        process_one(&queue, &allocation, &breaker, job, index).await;
    }

    info!(worker = index, "webhook worker stopped");
}

async fn process_one(
    queue: &JobQueue,
    allocation: &AllocationEngine,
    breaker: &CircuitBreaker,
    mut job: funding_storage::FundingEventJob,
    worker: usize,
) {
    let was_open = breaker.is_open();
    let started = Instant::now();
    let job_id = job.id;
    let outcome = allocation
        .process_chain_deposit(
            job.chain,
            job.tx_hash.as_deref().or(job.provider_event_id.as_deref()).unwrap_or_default(),
            &job.token_code,
            job.amount,
            &job.to_address,
            job.block_time,
        )
        .await;

    let duration_ms = started.elapsed().as_millis() as i64;
    match outcome {
        Ok(result) => {
            breaker.record_success();
            if was_open {
                funding_metrics::jobs::record_circuit_breaker_reset(&worker.to_string());
            }
            let deposit_id = result.deposit_id();
            if let Err(err) = queue
                .record_success(&mut job, duration_ms, serde_json::json!({"deposit_id": deposit_id.to_string()}))
                .await
            {
                warn!(worker, %job_id, %err, "failed to persist job completion");
            }
            info!(worker, %job_id, %deposit_id, duration_ms, "job completed");
        }
        Err(err) => {
            let error_type = ErrorType::classify(&err);
            if !matches!(error_type, ErrorType::Permanent) {
                breaker.record_failure();
                if !was_open && breaker.is_open() {
                    funding_metrics::jobs::record_circuit_breaker_trip(&worker.to_string());
                }
            }
            if let Err(update_err) = queue.record_failure(&mut job, &err.to_string(), error_type, duration_ms).await {
                warn!(worker, %job_id, %update_err, "failed to persist job failure");
            }
            warn!(worker, %job_id, %err, error_type = error_type.as_str(), attempt = job.attempt_count, "job failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use funding_adapters::fake::{FakeChainCustody, FakeNotificationAdapter};
    use funding_allocation::NoopLimits;
    use funding_common::{Chain, Money};
    use funding_jobqueue::RetryPolicy;
    use funding_ledger::Ledger;
    use funding_storage::memory::{InMemoryAuditLog, InMemoryDeposits, InMemoryJobs, InMemoryLedger, InMemoryWallets};
    use funding_storage::NewFundingEventJob;
    use rust_decimal_macros::dec;
    use std::time::Duration as StdDuration;

    async fn harness() -> (JobQueue, Arc<AllocationEngine>, Arc<InMemoryWallets>, funding_common::UserId, String) {
        let wallets = Arc::new(InMemoryWallets::new());
        let user = funding_common::UserId::new();
        let (_, address) = wallets
            .get_or_create_wallet(user, Chain::Ethereum, &|| "0xW".to_string())
            .await
            .unwrap();

        let allocation = Arc::new(AllocationEngine::new(
            Arc::new(InMemoryDeposits::new()),
            wallets.clone(),
            Ledger::new(Arc::new(InMemoryLedger::new()), None),
            Arc::new(InMemoryAuditLog::new()),
            Arc::new(FakeChainCustody::new()),
            Arc::new(FakeNotificationAdapter::default()),
            Arc::new(NoopLimits),
            Money::new(dec!(1.00)),
            Money::new(dec!(10000.00)),
        ));
        let queue = JobQueue::new(
            Arc::new(InMemoryJobs::new()),
            RetryPolicy::new(StdDuration::from_millis(5), StdDuration::from_millis(50), 3),
        );
        (queue, allocation, wallets, user, address)
    }

    fn config() -> ProcessorConfig {
        ProcessorConfig {
            worker_count: 2,
            poll_interval: StdDuration::from_millis(10),
            job_lease: chrono::Duration::seconds(30),
            circuit_threshold: 5,
            circuit_timeout: StdDuration::from_secs(60),
        }
    }

    #[tokio::test]
    async fn worker_pool_drains_a_pending_job_and_shuts_down_cleanly() {
        let (queue, allocation, _wallets, user, address) = harness().await;
        queue
            .enqueue(NewFundingEventJob {
                chain: Chain::Ethereum,
                tx_hash: Some("0xabc".to_string()),
                provider_event_id: None,
                token_code: "USDC".to_string(),
                amount: Money::new(dec!(100.00)),
                to_address: address,
                block_time: chrono::Utc::now(),
                max_attempts: 3,
            })
            .await
            .unwrap();

        let processor = WebhookProcessor::new(queue.clone(), allocation.clone(), config());
        let shutdown = CancellationToken::new();
        let shutdown_clone = shutdown.clone();
        let run = tokio::spawn(processor.run(shutdown_clone));

        tokio::time::sleep(StdDuration::from_millis(100)).await;
        shutdown.cancel();
        run.await.unwrap();

        let balances = allocation.ledger().get_balances(user).await.unwrap();
        assert_eq!(balances.spend_buffer, Money::new(dec!(70.00)));
        assert_eq!(balances.invest_buffer, Money::new(dec!(30.00)));

        let metrics = queue.metrics().await.unwrap();
        assert_eq!(metrics.completed, 1);
    }

    #[tokio::test]
    async fn permanent_failure_moves_straight_to_dlq_without_tripping_the_breaker() {
        let (_queue, allocation, _wallets, _user, address) = harness().await;
        // `max_attempts: 5` deliberately leaves room for retries — if a
        // permanent error were dlq'd only via `is_final_attempt`, this test
        // would fail instead of masking the bug.
        let queue = JobQueue::new(
            Arc::new(InMemoryJobs::new()),
            RetryPolicy::new(StdDuration::from_millis(5), StdDuration::from_millis(50), 5),
        );
        queue
            .enqueue(NewFundingEventJob {
                chain: Chain::Ethereum,
                tx_hash: Some("0xdef".to_string()),
                provider_event_id: None,
                token_code: "USDC".to_string(),
                amount: Money::new(dec!(0.01)),
                to_address: address,
                block_time: chrono::Utc::now(),
                max_attempts: 5,
            })
            .await
            .unwrap();

        let processor = WebhookProcessor::new(queue.clone(), allocation.clone(), config());
        let shutdown = CancellationToken::new();
        let shutdown_clone = shutdown.clone();
        let run = tokio::spawn(processor.run(shutdown_clone));

        tokio::time::sleep(StdDuration::from_millis(60)).await;
        shutdown.cancel();
        run.await.unwrap();

        let metrics = queue.metrics().await.unwrap();
        assert_eq!(metrics.dlq_depth, 1);
    }
}
