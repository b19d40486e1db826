use crate::error::map_sqlx_error;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use funding_common::CoreError;
use serde_json::Value;
use sqlx::{PgPool, Row};

#[derive(Debug, Clone)]
pub struct IdempotencyRecord {
    pub key: String,
    pub request_path: String,
    pub request_method: String,
    pub request_hash: String,
    pub response_status: i32,
    pub response_body: Value,
    pub expires_at: DateTime<Utc>,
}

/// Used at both the HTTP edge (keyed on the caller's
/// `Idempotency-Key`) and the event edge (keyed on a synthetic hash of the
/// provider event id and a minute bucket).
#[async_trait]
pub trait IdempotencyRepository: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<IdempotencyRecord>, CoreError>;

    /// Fails with `CoreError::Conflict` if `key` already exists.
    async fn put(&self, record: IdempotencyRecord) -> Result<(), CoreError>;

    /// Sweeps rows with `expires_at <= now`; returns count removed.
    async fn reap_expired(&self) -> Result<u64, CoreError>;
}

pub struct PgIdempotencyRepository {
    pool: PgPool,
}

impl PgIdempotencyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdempotencyRepository for PgIdempotencyRepository {
    async fn get(&self, key: &str) -> Result<Option<IdempotencyRecord>, CoreError> {
        let row = sqlx::query(
            "SELECT key, request_path, request_method, request_hash, response_status, response_body, expires_at \
             FROM idempotency_keys WHERE key = $1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(row.map(|r| IdempotencyRecord {
            key: r.get("key"),
            request_path: r.get("request_path"),
            request_method: r.get("request_method"),
            request_hash: r.get("request_hash"),
            response_status: r.get("response_status"),
            response_body: r.get("response_body"),
            expires_at: r.get("expires_at"),
        }))
    }

    async fn put(&self, record: IdempotencyRecord) -> Result<(), CoreError> {
        sqlx::query(
            "INSERT INTO idempotency_keys \
             (key, request_path, request_method, request_hash, response_status, response_body, expires_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(&record.key)
        .bind(&record.request_path)
        .bind(&record.request_method)
        .bind(&record.request_hash)
        .bind(record.response_status)
        .bind(&record.response_body)
        .bind(record.expires_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn reap_expired(&self) -> Result<u64, CoreError> {
        let result = sqlx::query("DELETE FROM idempotency_keys WHERE expires_at <= $1")
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }
}
