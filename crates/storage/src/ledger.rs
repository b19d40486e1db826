use crate::error::map_sqlx_error;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use funding_common::{
    AccountType, CoreError, EntryDirection, LedgerTransactionId, Money, TransactionType, UserId,
};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::{PgPool, Row};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct NewEntry {
    pub account_type: AccountType,
    /// `None` only for the system `deposit_suspense` account.
    pub account_user: Option<UserId>,
    pub direction: EntryDirection,
    pub amount: Money,
}

impl NewEntry {
    pub fn user(account_type: AccountType, user: UserId, direction: EntryDirection, amount: Money) -> Self {
        Self {
            account_type,
            account_user: Some(user),
            direction,
            amount,
        }
    }

    pub fn system(account_type: AccountType, direction: EntryDirection, amount: Money) -> Self {
        Self {
            account_type,
            account_user: None,
            direction,
            amount,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Balances {
    pub usdc_balance: Money,
    pub fiat_exposure: Money,
    pub pending_investment: Money,
    pub spend_buffer: Money,
    pub invest_buffer: Money,
    pub total_value: Money,
}

#[derive(Debug, Clone)]
pub struct LedgerTransactionRecord {
    pub id: LedgerTransactionId,
    pub transaction_type: TransactionType,
    pub reference_id: Option<Uuid>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

/// Double-entry ledger: every write is a balanced transaction.
#[async_trait]
pub trait LedgerRepository: Send + Sync {
    /// Atomically writes a transaction and all of its entries. Preconditions
    /// (debits == credits per currency, every entry references a valid
    /// account) are checked before any row is written.
    async fn post_transaction(
        &self,
        user: UserId,
        transaction_type: TransactionType,
        reference_id: Option<Uuid>,
        reference_type: Option<&str>,
        metadata: Value,
        entries: Vec<NewEntry>,
    ) -> Result<LedgerTransactionId, CoreError>;

    async fn get_balances(&self, user: UserId) -> Result<Balances, CoreError>;

    async fn get_transactions(
        &self,
        user: UserId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<LedgerTransactionRecord>, CoreError>;
}

fn check_balanced(entries: &[NewEntry]) -> Result<(), CoreError> {
    let mut debits = Decimal::ZERO;
    let mut credits = Decimal::ZERO;
    for e in entries {
        if !e.amount.is_positive() {
            return Err(CoreError::InvalidBalance {
                debits: debits.to_string(),
                credits: credits.to_string(),
            });
        }
        match e.direction {
            EntryDirection::Debit => debits += e.amount.as_decimal(),
            EntryDirection::Credit => credits += e.amount.as_decimal(),
        }
    }
    if debits != credits {
        return Err(CoreError::InvalidBalance {
            debits: debits.to_string(),
            credits: credits.to_string(),
        });
    }
    Ok(())
}

pub struct PgLedgerRepository {
    pool: PgPool,
}

impl PgLedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn get_or_create_account(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        account_user: Option<UserId>,
        account_type: AccountType,
    ) -> Result<Uuid, CoreError> {
        let account_type_str = serde_json::to_value(account_type)
            .map_err(|e| CoreError::StorageUnavailable(e.to_string()))?;
        let account_type_str = account_type_str.as_str().unwrap_or_default();
        let user_uuid = account_user.map(Uuid::from);

        let existing = sqlx::query(
            "SELECT id FROM ledger_accounts WHERE account_type = $1 AND user_id IS NOT DISTINCT FROM $2",
        )
        .bind(account_type_str)
        .bind(user_uuid)
        .fetch_optional(&mut **tx)
        .await
        .map_err(map_sqlx_error)?;

        if let Some(row) = existing {
            return Ok(row.get::<Uuid, _>("id"));
        }

        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO ledger_accounts (id, user_id, account_type) VALUES ($1, $2, $3)")
            .bind(id)
            .bind(user_uuid)
            .bind(account_type_str)
            .execute(&mut **tx)
            .await
            .map_err(map_sqlx_error)?;
        Ok(id)
    }
}

#[async_trait]
impl LedgerRepository for PgLedgerRepository {
    async fn post_transaction(
        &self,
        user: UserId,
        transaction_type: TransactionType,
        reference_id: Option<Uuid>,
        reference_type: Option<&str>,
        metadata: Value,
        entries: Vec<NewEntry>,
    ) -> Result<LedgerTransactionId, CoreError> {
        check_balanced(&entries)?;

        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        let transaction_id = Uuid::new_v4();
        let tx_type_value = serde_json::to_value(transaction_type)
            .map_err(|e| CoreError::StorageUnavailable(e.to_string()))?;
        let tx_type_str = tx_type_value.as_str().unwrap_or_default();

        sqlx::query(
            "INSERT INTO ledger_transactions (id, user_id, transaction_type, reference_id, reference_type, status, metadata) \
             VALUES ($1, $2, $3, $4, $5, 'completed', $6)",
        )
        .bind(transaction_id)
        .bind(Uuid::from(user))
        .bind(tx_type_str)
        .bind(reference_id)
        .bind(reference_type)
        .bind(metadata)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        for entry in &entries {
            let account_id =
                Self::get_or_create_account(&mut tx, entry.account_user, entry.account_type).await?;
            let direction_value = serde_json::to_value(entry.direction)
                .map_err(|e| CoreError::StorageUnavailable(e.to_string()))?;
            let direction_str = direction_value.as_str().unwrap_or_default();
            sqlx::query(
                "INSERT INTO ledger_entries (id, transaction_id, account_id, direction, amount) \
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(Uuid::new_v4())
            .bind(transaction_id)
            .bind(account_id)
            .bind(direction_str)
            .bind(entry.amount.as_decimal())
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(LedgerTransactionId::from(transaction_id))
    }

    async fn get_balances(&self, user: UserId) -> Result<Balances, CoreError> {
        let rows = sqlx::query(
            "SELECT la.account_type AS account_type, \
                    COALESCE(SUM(CASE WHEN le.direction = 'credit' THEN le.amount ELSE -le.amount END), 0) AS balance \
             FROM ledger_accounts la \
             LEFT JOIN ledger_entries le ON le.account_id = la.id \
             WHERE la.user_id = $1 \
             GROUP BY la.account_type",
        )
        .bind(Uuid::from(user))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let mut balances = Balances::default();
        for row in rows {
            let account_type: String = row.get("account_type");
            let balance: Decimal = row.get("balance");
            match account_type.as_str() {
                "usdc_balance" => balances.usdc_balance = Money::new(balance),
                "fiat_exposure" => balances.fiat_exposure = Money::new(balance),
                "pending_investment" => balances.pending_investment = Money::new(balance),
                "spend_buffer" => balances.spend_buffer = Money::new(balance),
                "invest_buffer" => balances.invest_buffer = Money::new(balance),
                _ => {}
            }
        }
        balances.total_value = balances.usdc_balance
            + balances.fiat_exposure
            + balances.pending_investment
            + balances.spend_buffer
            + balances.invest_buffer;
        Ok(balances)
    }

    async fn get_transactions(
        &self,
        user: UserId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<LedgerTransactionRecord>, CoreError> {
        let rows = sqlx::query(
            "SELECT id, transaction_type, reference_id, metadata, created_at \
             FROM ledger_transactions WHERE user_id = $1 \
             ORDER BY created_at DESC LIMIT $2 OFFSET $3",
        )
        .bind(Uuid::from(user))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter()
            .map(|row| {
                let transaction_type_str: String = row.get("transaction_type");
                let transaction_type: TransactionType =
                    serde_json::from_value(Value::String(transaction_type_str))
                        .map_err(|e| CoreError::StorageUnavailable(e.to_string()))?;
                Ok(LedgerTransactionRecord {
                    id: LedgerTransactionId::from(row.get::<Uuid, _>("id")),
                    transaction_type,
                    reference_id: row.get("reference_id"),
                    metadata: row.get("metadata"),
                    created_at: row.get("created_at"),
                })
            })
            .collect()
    }
}
