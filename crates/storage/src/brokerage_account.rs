use crate::error::map_sqlx_error;
use async_trait::async_trait;
use funding_common::{CoreError, UserId};
use sqlx::{PgPool, Row};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerageAccount {
    pub account: String,
    pub status: String,
}

impl BrokerageAccount {
    pub fn is_active(&self) -> bool {
        self.status == "active"
    }
}

#[async_trait]
pub trait BrokerageAccountRepository: Send + Sync {
    async fn find_by_user(&self, user: UserId) -> Result<Option<BrokerageAccount>, CoreError>;
}

pub struct PgBrokerageAccountRepository {
    pool: PgPool,
}

impl PgBrokerageAccountRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BrokerageAccountRepository for PgBrokerageAccountRepository {
    async fn find_by_user(&self, user: UserId) -> Result<Option<BrokerageAccount>, CoreError> {
        let row = sqlx::query("SELECT account, status FROM brokerage_accounts WHERE user_id = $1")
            .bind(Uuid::from(user))
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(row.map(|r| BrokerageAccount {
            account: r.get("account"),
            status: r.get("status"),
        }))
    }
}
