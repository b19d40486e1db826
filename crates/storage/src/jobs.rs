use crate::error::map_sqlx_error;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use funding_common::{Chain, CoreError, DepositId, ErrorType, JobId, JobStatus, Money};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{PgPool, Row};
use uuid::Uuid;

/// A single entry in a job's append-only processing log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingLogEntry {
    pub timestamp: DateTime<Utc>,
    pub attempt: i32,
    pub status: JobStatus,
    pub duration_ms: i64,
    pub error: Option<String>,
    pub error_type: Option<ErrorType>,
    pub metadata: Value,
}

#[derive(Debug, Clone)]
pub struct FundingEventJob {
    pub id: JobId,
    pub deposit_id: Option<DepositId>,
    pub chain: Chain,
    pub tx_hash: Option<String>,
    pub provider_event_id: Option<String>,
    pub token_code: String,
    pub amount: Money,
    pub to_address: String,
    /// The chain's own timestamp for the transaction, as reported by the
    /// webhook payload — distinct from `first_seen_at`, which is when this
    /// row was created.
    pub block_time: DateTime<Utc>,
    pub first_seen_at: DateTime<Utc>,
    pub next_retry_at: DateTime<Utc>,
    pub attempt_count: i32,
    pub max_attempts: i32,
    pub status: JobStatus,
    pub failure_reason: Option<String>,
    pub error_type: Option<ErrorType>,
    pub processing_log: Vec<ProcessingLogEntry>,
    pub lease_expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewFundingEventJob {
    pub chain: Chain,
    pub tx_hash: Option<String>,
    pub provider_event_id: Option<String>,
    pub token_code: String,
    pub amount: Money,
    pub to_address: String,
    pub block_time: DateTime<Utc>,
    pub max_attempts: i32,
}

#[derive(Debug, Clone, Default)]
pub struct JobMetrics {
    pub total: i64,
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub dlq_depth: i64,
    pub success_rate: f64,
    pub avg_attempt_count: f64,
    pub avg_latency_ms: f64,
}

/// The durable funding-event work queue: claim, retry, and reconciliation
/// sweeps all operate on this table.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Idempotent on (chain, tx_hash) or (provider_event_id): returns the
    /// existing row if one is already there.
    async fn enqueue(&self, new_job: NewFundingEventJob) -> Result<FundingEventJob, CoreError>;

    /// Claims up to `limit` due rows, marking them `processing` in the same
    /// transaction (`SELECT ... FOR UPDATE SKIP LOCKED`), and reclaims rows
    /// whose lease has expired.
    async fn claim_next(&self, limit: i64, lease: chrono::Duration) -> Result<Vec<FundingEventJob>, CoreError>;

    async fn update(&self, job: &FundingEventJob) -> Result<(), CoreError>;

    async fn find_reconciliation_candidates(
        &self,
        threshold: chrono::Duration,
        limit: i64,
    ) -> Result<Vec<FundingEventJob>, CoreError>;

    async fn metrics(&self) -> Result<JobMetrics, CoreError>;
}

fn row_to_job(row: &sqlx::postgres::PgRow) -> Result<FundingEventJob, CoreError> {
    let status_str: String = row.get("status");
    let status: JobStatus = serde_json::from_value(Value::String(status_str))
        .map_err(|e| CoreError::StorageUnavailable(e.to_string()))?;
    let chain_str: String = row.get("chain");
    let chain = Chain::from_str_opt(&chain_str)
        .ok_or_else(|| CoreError::StorageUnavailable(format!("unknown chain {chain_str}")))?;
    let error_type: Option<String> = row.get("error_type");
    let error_type = error_type
        .map(|s| serde_json::from_value::<ErrorType>(Value::String(s)))
        .transpose()
        .map_err(|e| CoreError::StorageUnavailable(e.to_string()))?;
    let log_value: Value = row.get("processing_log");
    let processing_log: Vec<ProcessingLogEntry> =
        serde_json::from_value(log_value).map_err(|e| CoreError::StorageUnavailable(e.to_string()))?;

    Ok(FundingEventJob {
        id: JobId::from(row.get::<Uuid, _>("id")),
        deposit_id: row.get::<Option<Uuid>, _>("deposit_id").map(DepositId::from),
        chain,
        tx_hash: row.get("tx_hash"),
        provider_event_id: row.get("provider_event_id"),
        token_code: row.get("token_code"),
        amount: Money::new(row.get("amount")),
        to_address: row.get("to_address"),
        block_time: row.get("block_time"),
        first_seen_at: row.get("first_seen_at"),
        next_retry_at: row.get("next_retry_at"),
        attempt_count: row.get("attempt_count"),
        max_attempts: row.get("max_attempts"),
        status,
        failure_reason: row.get("failure_reason"),
        error_type,
        processing_log,
        lease_expires_at: row.get("lease_expires_at"),
    })
}

pub struct PgJobRepository {
    pool: PgPool,
}

impl PgJobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobRepository for PgJobRepository {
    async fn enqueue(&self, new_job: NewFundingEventJob) -> Result<FundingEventJob, CoreError> {
        if let Some(tx_hash) = &new_job.tx_hash {
            if let Some(existing) = sqlx::query("SELECT * FROM funding_event_jobs WHERE chain = $1 AND tx_hash = $2")
                .bind(new_job.chain.as_str())
                .bind(tx_hash)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx_error)?
            {
                return row_to_job(&existing);
            }
        } else if let Some(event_id) = &new_job.provider_event_id {
            if let Some(existing) = sqlx::query("SELECT * FROM funding_event_jobs WHERE provider_event_id = $1")
                .bind(event_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx_error)?
            {
                return row_to_job(&existing);
            }
        }

        let id = Uuid::new_v4();
        let inserted = sqlx::query(
            "INSERT INTO funding_event_jobs \
             (id, chain, tx_hash, provider_event_id, token_code, amount, to_address, block_time, max_attempts, processing_log) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, '[]'::jsonb) \
             ON CONFLICT DO NOTHING RETURNING *",
        )
        .bind(id)
        .bind(new_job.chain.as_str())
        .bind(&new_job.tx_hash)
        .bind(&new_job.provider_event_id)
        .bind(&new_job.token_code)
        .bind(new_job.amount.as_decimal())
        .bind(&new_job.to_address)
        .bind(new_job.block_time)
        .bind(new_job.max_attempts)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        match inserted {
            Some(row) => row_to_job(&row),
            None => {
                // Lost the race: another worker inserted first.
                let row = if let Some(tx_hash) = &new_job.tx_hash {
                    sqlx::query("SELECT * FROM funding_event_jobs WHERE chain = $1 AND tx_hash = $2")
                        .bind(new_job.chain.as_str())
                        .bind(tx_hash)
                        .fetch_one(&self.pool)
                        .await
                } else {
                    sqlx::query("SELECT * FROM funding_event_jobs WHERE provider_event_id = $1")
                        .bind(&new_job.provider_event_id)
                        .fetch_one(&self.pool)
                        .await
                }
                .map_err(map_sqlx_error)?;
                row_to_job(&row)
            }
        }
    }

    async fn claim_next(&self, limit: i64, lease: chrono::Duration) -> Result<Vec<FundingEventJob>, CoreError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let now = Utc::now();

        // Reclaim leases that expired without the worker marking the job
        // terminal: rows stuck in `processing` beyond their lease are
        // eligible to be picked up again.
        sqlx::query(
            "UPDATE funding_event_jobs SET status = 'pending' \
             WHERE status = 'processing' AND lease_expires_at IS NOT NULL AND lease_expires_at < $1",
        )
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        let rows = sqlx::query(
            "SELECT * FROM funding_event_jobs \
             WHERE status = 'pending' AND next_retry_at <= $1 \
             ORDER BY next_retry_at ASC LIMIT $2 FOR UPDATE SKIP LOCKED",
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        let lease_expires_at = now + lease;
        let mut claimed = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: Uuid = row.get("id");
            sqlx::query("UPDATE funding_event_jobs SET status = 'processing', lease_expires_at = $1 WHERE id = $2")
                .bind(lease_expires_at)
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
            let mut job = row_to_job(row)?;
            job.status = JobStatus::Processing;
            job.lease_expires_at = Some(lease_expires_at);
            claimed.push(job);
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(claimed)
    }

    async fn update(&self, job: &FundingEventJob) -> Result<(), CoreError> {
        let status_value =
            serde_json::to_value(job.status).map_err(|e| CoreError::StorageUnavailable(e.to_string()))?;
        let error_type_value = job
            .error_type
            .map(|et| serde_json::to_value(et))
            .transpose()
            .map_err(|e: serde_json::Error| CoreError::StorageUnavailable(e.to_string()))?;
        let log_value = serde_json::to_value(&job.processing_log)
            .map_err(|e| CoreError::StorageUnavailable(e.to_string()))?;

        sqlx::query(
            "UPDATE funding_event_jobs SET \
                deposit_id = $1, next_retry_at = $2, attempt_count = $3, status = $4, \
                failure_reason = $5, error_type = $6, processing_log = $7, lease_expires_at = $8 \
             WHERE id = $9",
        )
        .bind(job.deposit_id.map(Uuid::from))
        .bind(job.next_retry_at)
        .bind(job.attempt_count)
        .bind(status_value.as_str().unwrap_or_default())
        .bind(&job.failure_reason)
        .bind(error_type_value.and_then(|v| v.as_str().map(str::to_string)))
        .bind(log_value)
        .bind(job.lease_expires_at)
        .bind(Uuid::from(job.id))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn find_reconciliation_candidates(
        &self,
        threshold: chrono::Duration,
        limit: i64,
    ) -> Result<Vec<FundingEventJob>, CoreError> {
        let clamped = threshold.min(chrono::Duration::days(365 * 10));
        let cutoff = Utc::now() - clamped;
        let rows = sqlx::query(
            "SELECT * FROM funding_event_jobs \
             WHERE status IN ('pending', 'processing') AND first_seen_at <= $1 \
             ORDER BY first_seen_at ASC LIMIT $2",
        )
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        rows.iter().map(row_to_job).collect()
    }

    async fn metrics(&self) -> Result<JobMetrics, CoreError> {
        let row = sqlx::query(
            "SELECT \
                count(*) AS total, \
                count(*) FILTER (WHERE status = 'pending') AS pending, \
                count(*) FILTER (WHERE status = 'processing') AS processing, \
                count(*) FILTER (WHERE status = 'completed') AS completed, \
                count(*) FILTER (WHERE status = 'dlq') AS dlq, \
                coalesce(avg(attempt_count), 0) AS avg_attempts \
             FROM funding_event_jobs",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let total: i64 = row.get("total");
        let completed: i64 = row.get("completed");
        let dlq: i64 = row.get("dlq");
        let avg_attempts: Option<f64> = row.get("avg_attempts");

        Ok(JobMetrics {
            total,
            pending: row.get("pending"),
            processing: row.get("processing"),
            completed,
            dlq_depth: dlq,
            success_rate: if total > 0 {
                completed as f64 / total as f64
            } else {
                0.0
            },
            avg_attempt_count: avg_attempts.unwrap_or(0.0),
            avg_latency_ms: 0.0,
        })
    }
}
