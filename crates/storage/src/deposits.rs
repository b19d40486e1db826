use crate::error::map_sqlx_error;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use funding_common::{Chain, CoreError, Deposit, DepositId, DepositStatus, Money, UserId, WalletId};
use sqlx::{PgPool, Row};
use uuid::Uuid;

#[async_trait]
pub trait DepositRepository: Send + Sync {
    /// Fails with `CoreError::Conflict` on a (chain, tx_hash) collision; the
    /// caller treats that as "already processed".
    async fn insert_deposit(&self, deposit: &Deposit) -> Result<(), CoreError>;

    async fn update_deposit_status(
        &self,
        id: DepositId,
        new_status: DepositStatus,
        by_reconciliation: bool,
        failure_reason: Option<&str>,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<(), CoreError>;

    async fn find_by_id(&self, id: DepositId) -> Result<Option<Deposit>, CoreError>;

    async fn find_by_tx_hash(&self, chain: Chain, tx_hash: &str) -> Result<Option<Deposit>, CoreError>;

    async fn find_by_provider_event_id(&self, event_id: &str) -> Result<Option<Deposit>, CoreError>;

    /// Candidates for reconciliation, ordered `created_at` ascending.
    async fn find_pending_older_than(
        &self,
        threshold: chrono::Duration,
        limit: i64,
    ) -> Result<Vec<Deposit>, CoreError>;

    /// Deposits that cleared on-chain confirmation (or are mid-way through
    /// the brokerage bridge's own off-ramp step) but haven't reached
    /// `broker_funded` yet, ordered `created_at` ascending.
    async fn find_confirmed_awaiting_broker_funding(&self, limit: i64) -> Result<Vec<Deposit>, CoreError>;
}

/// Wallet side of C2: `get_or_create_wallet` is idempotent on (user, chain).
#[async_trait]
pub trait WalletRepository: Send + Sync {
    async fn get_or_create_wallet(
        &self,
        user: UserId,
        chain: Chain,
        address_fn: &(dyn Fn() -> String + Send + Sync),
    ) -> Result<(WalletId, String), CoreError>;

    async fn find_by_address(&self, address: &str) -> Result<Option<(WalletId, UserId)>, CoreError>;
}

pub struct PgDepositRepository {
    pool: PgPool,
}

impl PgDepositRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_deposit(row: &sqlx::postgres::PgRow) -> Result<Deposit, CoreError> {
    let status_str: String = row.get("status");
    let status: DepositStatus = serde_json::from_value(serde_json::Value::String(status_str))
        .map_err(|e| CoreError::StorageUnavailable(e.to_string()))?;
    let chain_str: String = row.get("chain");
    let chain = Chain::from_str_opt(&chain_str)
        .ok_or_else(|| CoreError::StorageUnavailable(format!("unknown chain {chain_str}")))?;
    Ok(Deposit {
        id: DepositId::from(row.get::<Uuid, _>("id")),
        user_id: UserId::from(row.get::<Uuid, _>("user_id")),
        chain,
        tx_hash: row.get("tx_hash"),
        provider_event_id: row.get("provider_event_id"),
        token_code: row.get("token_code"),
        amount: Money::new(row.get("amount")),
        source_address: row.get("source_address"),
        destination_wallet_id: row
            .get::<Option<Uuid>, _>("destination_wallet_id")
            .map(WalletId::from),
        status,
        created_at: row.get("created_at"),
        confirmed_at: row.get("confirmed_at"),
        broker_funded_at: row.get("broker_funded_at"),
        failure_reason: row.get("failure_reason"),
    })
}

#[async_trait]
impl DepositRepository for PgDepositRepository {
    async fn insert_deposit(&self, deposit: &Deposit) -> Result<(), CoreError> {
        let status_value = serde_json::to_value(deposit.status)
            .map_err(|e| CoreError::StorageUnavailable(e.to_string()))?;
        sqlx::query(
            "INSERT INTO deposits (id, user_id, chain, tx_hash, provider_event_id, token_code, amount, \
             source_address, destination_wallet_id, status, created_at, confirmed_at, failure_reason) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(Uuid::from(deposit.id))
        .bind(Uuid::from(deposit.user_id))
        .bind(deposit.chain.as_str())
        .bind(&deposit.tx_hash)
        .bind(&deposit.provider_event_id)
        .bind(&deposit.token_code)
        .bind(deposit.amount.as_decimal())
        .bind(&deposit.source_address)
        .bind(deposit.destination_wallet_id.map(Uuid::from))
        .bind(status_value.as_str().unwrap_or_default())
        .bind(deposit.created_at)
        .bind(deposit.confirmed_at)
        .bind(&deposit.failure_reason)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn update_deposit_status(
        &self,
        id: DepositId,
        new_status: DepositStatus,
        by_reconciliation: bool,
        failure_reason: Option<&str>,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<(), CoreError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let row = sqlx::query("SELECT status FROM deposits WHERE id = $1 FOR UPDATE")
            .bind(Uuid::from(id))
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_sqlx_error)?
            .ok_or_else(|| CoreError::NotFound(format!("deposit {id}")))?;

        let current_status_str: String = row.get("status");
        let current_status: DepositStatus =
            serde_json::from_value(serde_json::Value::String(current_status_str))
                .map_err(|e| CoreError::StorageUnavailable(e.to_string()))?;

        DepositStatus::validate_transition(current_status, new_status, by_reconciliation)?;

        let status_value = serde_json::to_value(new_status)
            .map_err(|e| CoreError::StorageUnavailable(e.to_string()))?;
        let column = match new_status {
            DepositStatus::Confirmed => "confirmed_at",
            DepositStatus::BrokerFunded => "broker_funded_at",
            _ => "updated_placeholder",
        };

        if column == "updated_placeholder" {
            sqlx::query("UPDATE deposits SET status = $1, failure_reason = $2 WHERE id = $3")
                .bind(status_value.as_str().unwrap_or_default())
                .bind(failure_reason)
                .bind(Uuid::from(id))
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
        } else {
            let ts = timestamp.unwrap_or_else(Utc::now);
            let query = format!(
                "UPDATE deposits SET status = $1, failure_reason = $2, {column} = $3 WHERE id = $4"
            );
            sqlx::query(&query)
                .bind(status_value.as_str().unwrap_or_default())
                .bind(failure_reason)
                .bind(ts)
                .bind(Uuid::from(id))
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn find_by_id(&self, id: DepositId) -> Result<Option<Deposit>, CoreError> {
        let row = sqlx::query("SELECT * FROM deposits WHERE id = $1")
            .bind(Uuid::from(id))
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        row.as_ref().map(row_to_deposit).transpose()
    }

    async fn find_by_tx_hash(&self, chain: Chain, tx_hash: &str) -> Result<Option<Deposit>, CoreError> {
        let row = sqlx::query("SELECT * FROM deposits WHERE chain = $1 AND tx_hash = $2")
            .bind(chain.as_str())
            .bind(tx_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        row.as_ref().map(row_to_deposit).transpose()
    }

    async fn find_by_provider_event_id(&self, event_id: &str) -> Result<Option<Deposit>, CoreError> {
        let row = sqlx::query("SELECT * FROM deposits WHERE provider_event_id = $1")
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        row.as_ref().map(row_to_deposit).transpose()
    }

    async fn find_pending_older_than(
        &self,
        threshold: chrono::Duration,
        limit: i64,
    ) -> Result<Vec<Deposit>, CoreError> {
        // Clamp to an upper bound to prevent timestamp overflow.
        let clamped = threshold.min(chrono::Duration::days(365 * 10));
        let cutoff = Utc::now() - clamped;
        let rows = sqlx::query(
            "SELECT * FROM deposits WHERE status = 'pending' AND created_at <= $1 \
             ORDER BY created_at ASC LIMIT $2",
        )
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        rows.iter().map(row_to_deposit).collect()
    }

    async fn find_confirmed_awaiting_broker_funding(&self, limit: i64) -> Result<Vec<Deposit>, CoreError> {
        let rows = sqlx::query(
            "SELECT * FROM deposits WHERE status IN ('confirmed', 'off_ramp_completed') \
             ORDER BY created_at ASC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        rows.iter().map(row_to_deposit).collect()
    }
}

pub struct PgWalletRepository {
    pool: PgPool,
}

impl PgWalletRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WalletRepository for PgWalletRepository {
    async fn get_or_create_wallet(
        &self,
        user: UserId,
        chain: Chain,
        address_fn: &(dyn Fn() -> String + Send + Sync),
    ) -> Result<(WalletId, String), CoreError> {
        let existing = sqlx::query("SELECT id, address FROM wallets WHERE user_id = $1 AND chain = $2")
            .bind(Uuid::from(user))
            .bind(chain.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        if let Some(row) = existing {
            return Ok((WalletId::from(row.get::<Uuid, _>("id")), row.get("address")));
        }

        let address = address_fn();
        let id = Uuid::new_v4();
        let inserted = sqlx::query(
            "INSERT INTO wallets (id, user_id, chain, address) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (user_id, chain) DO NOTHING",
        )
        .bind(id)
        .bind(Uuid::from(user))
        .bind(chain.as_str())
        .bind(&address)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if inserted.rows_affected() == 0 {
            // Lost the race to a concurrent first-deposit-address request.
            let row = sqlx::query("SELECT id, address FROM wallets WHERE user_id = $1 AND chain = $2")
                .bind(Uuid::from(user))
                .bind(chain.as_str())
                .fetch_one(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
            return Ok((WalletId::from(row.get::<Uuid, _>("id")), row.get("address")));
        }
        Ok((WalletId::from(id), address))
    }

    async fn find_by_address(&self, address: &str) -> Result<Option<(WalletId, UserId)>, CoreError> {
        let row = sqlx::query("SELECT id, user_id FROM wallets WHERE address = $1")
            .bind(address)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(row.map(|r| {
            (
                WalletId::from(r.get::<Uuid, _>("id")),
                UserId::from(r.get::<Uuid, _>("user_id")),
            )
        }))
    }
}
