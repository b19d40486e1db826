//! Retry-schedule computation and dead-letter transition logic layered over
//! [`funding_storage::JobRepository`]. The repository owns claim/lease
//! semantics; this crate owns what happens to a job's status and schedule
//! after an attempt succeeds or fails.

use chrono::{Duration as ChronoDuration, Utc};
use funding_common::{CoreError, ErrorType, JobStatus};
use funding_storage::{FundingEventJob, JobRepository, NewFundingEventJob, ProcessingLogEntry};
use rand::Rng;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Exponential backoff with full jitter: after `k` failures, the base delay
/// is `base * 2^(k-1)` capped at `cap`, then scaled by a uniform random
/// factor in `[0.5, 1.0]`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: i32,
}

impl RetryPolicy {
    pub fn new(base: Duration, cap: Duration, max_attempts: i32) -> Self {
        Self { base, cap, max_attempts }
    }

    /// `attempt` is the number of failures so far (1 after the first
    /// failure). Returns the delay before the next attempt is eligible.
    pub fn delay_for_attempt(&self, attempt: i32) -> Duration {
        self.delay_for_attempt_with_rng(attempt, &mut rand::thread_rng())
    }

    fn delay_for_attempt_with_rng(&self, attempt: i32, rng: &mut impl Rng) -> Duration {
        let exponent = attempt.saturating_sub(1).clamp(0, 30) as u32;
        let base_ms = self.base.as_millis() as u64;
        let scaled = base_ms.saturating_mul(1u64.checked_shl(exponent).unwrap_or(u64::MAX).max(1));
        let capped_ms = scaled.min(self.cap.as_millis() as u64);
        let factor: f64 = rng.gen_range(0.5..=1.0);
        Duration::from_millis(((capped_ms as f64) * factor) as u64)
    }

    pub fn is_final_attempt(&self, attempt_count: i32) -> bool {
        attempt_count >= self.max_attempts
    }
}

/// Wraps [`JobRepository`] with the retry/DLQ state machine.
#[derive(Clone)]
pub struct JobQueue {
    repo: Arc<dyn JobRepository>,
    policy: RetryPolicy,
}

impl JobQueue {
    pub fn new(repo: Arc<dyn JobRepository>, policy: RetryPolicy) -> Self {
        Self { repo, policy }
    }

    pub async fn enqueue(&self, new_job: NewFundingEventJob) -> Result<FundingEventJob, CoreError> {
        let chain = new_job.chain;
        let job = self.repo.enqueue(new_job).await?;
        funding_metrics::jobs::record_job_enqueued(chain.as_str());
        Ok(job)
    }

    pub async fn claim_next(
        &self,
        limit: i64,
        lease: ChronoDuration,
    ) -> Result<Vec<FundingEventJob>, CoreError> {
        self.repo.claim_next(limit, lease).await
    }

    /// Marks `job` completed and persists the result.
    pub async fn record_success(
        &self,
        job: &mut FundingEventJob,
        duration_ms: i64,
        metadata: Value,
    ) -> Result<(), CoreError> {
        job.status = JobStatus::Completed;
        job.processing_log.push(ProcessingLogEntry {
            timestamp: Utc::now(),
            attempt: job.attempt_count,
            status: JobStatus::Completed,
            duration_ms,
            error: None,
            error_type: None,
            metadata,
        });
        funding_metrics::jobs::record_job_succeeded(job.chain.as_str());
        funding_metrics::jobs::record_job_processing_seconds(job.chain.as_str(), duration_ms as f64 / 1000.0);
        self.repo.update(job).await
    }

    /// Records a failed attempt: bumps `attempt_count`, appends a log entry,
    /// and either schedules the next retry or moves the job to `dlq`. A
    /// `Permanent` error always dlqs on its first occurrence, regardless of
    /// `max_attempts` — retrying it can't change the outcome.
    pub async fn record_failure(
        &self,
        job: &mut FundingEventJob,
        error: &str,
        error_type: ErrorType,
        duration_ms: i64,
    ) -> Result<(), CoreError> {
        job.attempt_count += 1;
        let terminal = matches!(error_type, ErrorType::Permanent) || self.policy.is_final_attempt(job.attempt_count);
        job.status = if terminal { JobStatus::Dlq } else { JobStatus::Pending };
        job.failure_reason = Some(error.to_string());
        job.error_type = Some(error_type);
        if !terminal {
            let delay = self.policy.delay_for_attempt(job.attempt_count);
            job.next_retry_at = Utc::now() + ChronoDuration::milliseconds(delay.as_millis() as i64);
        }
        job.processing_log.push(ProcessingLogEntry {
            timestamp: Utc::now(),
            attempt: job.attempt_count,
            status: job.status,
            duration_ms,
            error: Some(error.to_string()),
            error_type: Some(error_type),
            metadata: Value::Null,
        });
        if terminal {
            funding_metrics::jobs::record_job_dlq(job.chain.as_str());
        } else {
            funding_metrics::jobs::record_job_retried(job.chain.as_str(), error_type.as_str());
        }
        self.repo.update(job).await
    }

    /// Terminal "failed" transition driven by a reconciliation verdict
    /// (confirmed-on-chain failure, or never found past the grace period) —
    /// distinct from [`JobQueue::record_failure`]'s retry/dlq state machine,
    /// which only applies to a worker's own processing attempt.
    pub async fn mark_failed(&self, job: &mut FundingEventJob, reason: &str) -> Result<(), CoreError> {
        job.status = JobStatus::Failed;
        job.failure_reason = Some(reason.to_string());
        job.processing_log.push(ProcessingLogEntry {
            timestamp: Utc::now(),
            attempt: job.attempt_count,
            status: JobStatus::Failed,
            duration_ms: 0,
            error: Some(reason.to_string()),
            error_type: None,
            metadata: Value::Null,
        });
        self.repo.update(job).await
    }

    pub async fn find_reconciliation_candidates(
        &self,
        threshold: ChronoDuration,
        limit: i64,
    ) -> Result<Vec<FundingEventJob>, CoreError> {
        self.repo.find_reconciliation_candidates(threshold, limit).await
    }

    pub async fn metrics(&self) -> Result<funding_storage::JobMetrics, CoreError> {
        self.repo.metrics().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use funding_common::Chain;
    use funding_storage::memory::InMemoryJobs;
    use funding_common::Money;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(Duration::from_millis(1000), Duration::from_millis(300_000), 5)
    }

    #[test]
    fn delay_grows_exponentially_and_respects_cap() {
        let p = policy();
        for attempt in 1..=10 {
            let delay = p.delay_for_attempt_with_rng(attempt, &mut rand::rngs::mock::StepRng::new(u64::MAX / 2, 0));
            assert!(delay <= p.cap, "attempt {attempt} exceeded cap: {delay:?}");
        }
    }

    #[test]
    fn delay_is_within_half_jitter_bounds() {
        let p = RetryPolicy::new(Duration::from_millis(1000), Duration::from_millis(300_000), 5);
        let full = 1000u128 * 2u128.pow(2); // attempt 3 -> 2^(3-1) = 4x base
        for _ in 0..20 {
            let delay = p.delay_for_attempt(3);
            let ms = delay.as_millis();
            assert!(ms <= full, "{ms} should be <= {full}");
            assert!(ms as f64 >= (full as f64) * 0.5 - 1.0, "{ms} should be >= half of {full}");
        }
    }

    #[test]
    fn final_attempt_detection() {
        let p = policy();
        assert!(!p.is_final_attempt(4));
        assert!(p.is_final_attempt(5));
        assert!(p.is_final_attempt(6));
    }

    #[tokio::test]
    async fn failure_moves_to_dlq_on_last_attempt() {
        let repo = std::sync::Arc::new(InMemoryJobs::new());
        let queue = JobQueue::new(repo, RetryPolicy::new(Duration::from_millis(10), Duration::from_millis(100), 2));
        let mut job = queue
            .enqueue(NewFundingEventJob {
                chain: Chain::Ethereum,
                tx_hash: Some("0xabc".to_string()),
                provider_event_id: None,
                token_code: "USDC".to_string(),
                amount: Money::new(dec!(100)),
                to_address: "0xdead".to_string(),
                block_time: Utc::now(),
                max_attempts: 2,
            })
            .await
            .unwrap();

        queue.record_failure(&mut job, "rpc timeout", ErrorType::Transient, 50).await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempt_count, 1);

        queue.record_failure(&mut job, "rpc timeout", ErrorType::Transient, 50).await.unwrap();
        assert_eq!(job.status, JobStatus::Dlq);
        assert_eq!(job.attempt_count, 2);
    }

    proptest! {
        #[test]
        fn delay_never_exceeds_cap(
            base_ms in 1u64..10_000,
            cap_ms in 1u64..300_000,
            attempt in 1i32..50,
            rng_seed in any::<u64>(),
        ) {
            let p = RetryPolicy::new(Duration::from_millis(base_ms), Duration::from_millis(cap_ms), 10);
            let mut rng = rand::rngs::mock::StepRng::new(rng_seed, 0x9E3779B97F4A7C15);
            let delay = p.delay_for_attempt_with_rng(attempt, &mut rng);
            prop_assert!(delay <= p.cap);
        }

        #[test]
        fn a_failing_job_is_never_lost(max_attempts in 1i32..10, failures in 1usize..20) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let repo = std::sync::Arc::new(InMemoryJobs::new());
                let queue = JobQueue::new(
                    repo,
                    RetryPolicy::new(Duration::from_millis(1), Duration::from_millis(5), max_attempts),
                );
                let mut job = queue
                    .enqueue(NewFundingEventJob {
                        chain: Chain::Ethereum,
                        tx_hash: Some("0xabc".to_string()),
                        provider_event_id: None,
                        token_code: "USDC".to_string(),
                        amount: Money::new(dec!(100)),
                        to_address: "0xdead".to_string(),
                        block_time: Utc::now(),
                        max_attempts,
                    })
                    .await
                    .unwrap();

                let mut previous_attempts = 0;
                let mut reached_dlq = false;
                for _ in 0..failures {
                    if reached_dlq {
                        break;
                    }
                    queue.record_failure(&mut job, "synthetic", ErrorType::Transient, 10).await.unwrap();
                    assert!(job.attempt_count > previous_attempts, "attempt_count must strictly increase");
                    previous_attempts = job.attempt_count;
                    assert!(matches!(job.status, JobStatus::Pending | JobStatus::Dlq));
                    reached_dlq = job.status == JobStatus::Dlq;
                }
                // Once in the dlq every further observation must still find it there:
                // a failing job never reverts to pending on its own and is never dropped.
                if reached_dlq {
                    assert_eq!(job.status, JobStatus::Dlq);
                }
            });
        }

        #[test]
        fn is_final_attempt_is_monotonic_in_attempt_count(
            max_attempts in 1i32..20,
            attempt_count in 0i32..40,
        ) {
            let p = RetryPolicy::new(Duration::from_millis(10), Duration::from_millis(1000), max_attempts);
            let final_now = p.is_final_attempt(attempt_count);
            let final_next = p.is_final_attempt(attempt_count + 1);
            // Once final, every later attempt count stays final.
            prop_assert!(!final_now || final_next);
        }
    }
}
