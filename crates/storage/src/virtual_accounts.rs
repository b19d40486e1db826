use crate::error::map_sqlx_error;
use async_trait::async_trait;
use funding_common::{CoreError, Currency, UserId, VirtualAccountId, VirtualAccountStatus};
use sqlx::{PgPool, Row};
use uuid::Uuid;

pub struct NewVirtualAccount {
    pub user_id: UserId,
    pub provider_account_id: String,
    pub currency: Currency,
    pub account_number: String,
    pub routing_number_or_iban: String,
}

#[async_trait]
pub trait VirtualAccountRepository: Send + Sync {
    /// Idempotent on (user, currency).
    async fn get_or_create(&self, new: NewVirtualAccount) -> Result<VirtualAccountId, CoreError>;

    async fn find_by_provider_id(
        &self,
        provider_account_id: &str,
    ) -> Result<Option<(VirtualAccountId, UserId)>, CoreError>;

    async fn set_status(
        &self,
        id: VirtualAccountId,
        status: VirtualAccountStatus,
    ) -> Result<(), CoreError>;
}

pub struct PgVirtualAccountRepository {
    pool: PgPool,
}

impl PgVirtualAccountRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VirtualAccountRepository for PgVirtualAccountRepository {
    async fn get_or_create(&self, new: NewVirtualAccount) -> Result<VirtualAccountId, CoreError> {
        let currency_value = serde_json::to_value(new.currency)
            .map_err(|e| CoreError::StorageUnavailable(e.to_string()))?;
        let currency_str = currency_value.as_str().unwrap_or_default();

        let existing = sqlx::query("SELECT id FROM virtual_accounts WHERE user_id = $1 AND currency = $2")
            .bind(Uuid::from(new.user_id))
            .bind(currency_str)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        if let Some(row) = existing {
            return Ok(VirtualAccountId::from(row.get::<Uuid, _>("id")));
        }

        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO virtual_accounts (id, user_id, provider_account_id, currency, status, account_number, routing_number_or_iban) \
             VALUES ($1, $2, $3, $4, 'active', $5, $6) ON CONFLICT (user_id, currency) DO NOTHING",
        )
        .bind(id)
        .bind(Uuid::from(new.user_id))
        .bind(&new.provider_account_id)
        .bind(currency_str)
        .bind(&new.account_number)
        .bind(&new.routing_number_or_iban)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let row = sqlx::query("SELECT id FROM virtual_accounts WHERE user_id = $1 AND currency = $2")
            .bind(Uuid::from(new.user_id))
            .bind(currency_str)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(VirtualAccountId::from(row.get::<Uuid, _>("id")))
    }

    async fn find_by_provider_id(
        &self,
        provider_account_id: &str,
    ) -> Result<Option<(VirtualAccountId, UserId)>, CoreError> {
        let row = sqlx::query("SELECT id, user_id FROM virtual_accounts WHERE provider_account_id = $1")
            .bind(provider_account_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(row.map(|r| {
            (
                VirtualAccountId::from(r.get::<Uuid, _>("id")),
                UserId::from(r.get::<Uuid, _>("user_id")),
            )
        }))
    }

    async fn set_status(
        &self,
        id: VirtualAccountId,
        status: VirtualAccountStatus,
    ) -> Result<(), CoreError> {
        let status_value = serde_json::to_value(status)
            .map_err(|e| CoreError::StorageUnavailable(e.to_string()))?;
        sqlx::query("UPDATE virtual_accounts SET status = $1 WHERE id = $2")
            .bind(status_value.as_str().unwrap_or_default())
            .bind(Uuid::from(id))
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }
}
