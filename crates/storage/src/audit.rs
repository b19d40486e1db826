use crate::error::map_sqlx_error;
use async_trait::async_trait;
use funding_common::{AuditLogEntry, CoreError};
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

/// Audit log writes are best-effort: a failed write should never fail the
/// operation it's recording. Callers should use
/// [`AuditLogRepository::log_best_effort`] rather than handling the
/// `Result` themselves.
#[async_trait]
pub trait AuditLogRepository: Send + Sync {
    async fn append(&self, entry: AuditLogEntry) -> Result<(), CoreError>;

    async fn log_best_effort(&self, entry: AuditLogEntry) {
        if let Err(err) = self.append(entry).await {
            warn!(%err, "audit log write failed, continuing");
        }
    }
}

pub struct PgAuditLogRepository {
    pool: PgPool,
}

impl PgAuditLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditLogRepository for PgAuditLogRepository {
    async fn append(&self, entry: AuditLogEntry) -> Result<(), CoreError> {
        sqlx::query(
            "INSERT INTO audit_log (id, action, actor, target, metadata, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(Uuid::new_v4())
        .bind(&entry.action)
        .bind(&entry.actor)
        .bind(&entry.target)
        .bind(&entry.metadata)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }
}
