use crate::error::map_sqlx_error;
use async_trait::async_trait;
use funding_common::{CoreError, DepositId, UserId};
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};
use uuid::Uuid;

/// Persisted basket-to-sub-order registry: the broker remains the source of
/// truth, but the mapping from `basket_ref` to its sub-orders must survive
/// a restart so `get_order_status` can be reconstructed.
#[derive(Debug, Clone)]
pub struct NewBasketOrder {
    pub basket_ref: String,
    pub symbol: String,
    pub client_order_id: String,
    pub weight: Decimal,
    pub amount: Decimal,
}

#[derive(Debug, Clone)]
pub struct BasketOrderRow {
    pub symbol: String,
    pub client_order_id: String,
    pub broker_order_id: Option<String>,
    pub status: String,
}

#[derive(Debug, Clone)]
pub struct BasketMeta {
    pub user_id: UserId,
    pub deposit_id: Option<DepositId>,
    pub account: String,
    pub status: String,
}

#[async_trait]
pub trait BasketRepository: Send + Sync {
    async fn create_basket(
        &self,
        basket_ref: &str,
        user: UserId,
        deposit: Option<DepositId>,
        account: &str,
        orders: Vec<NewBasketOrder>,
    ) -> Result<(), CoreError>;

    async fn set_broker_order_id(
        &self,
        client_order_id: &str,
        broker_order_id: &str,
    ) -> Result<(), CoreError>;

    async fn list_orders(&self, basket_ref: &str) -> Result<Vec<BasketOrderRow>, CoreError>;

    async fn set_basket_status(&self, basket_ref: &str, status: &str) -> Result<(), CoreError>;

    async fn find_basket(&self, basket_ref: &str) -> Result<Option<BasketMeta>, CoreError>;
}

pub struct PgBasketRepository {
    pool: PgPool,
}

impl PgBasketRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BasketRepository for PgBasketRepository {
    async fn create_basket(
        &self,
        basket_ref: &str,
        user: UserId,
        deposit: Option<DepositId>,
        account: &str,
        orders: Vec<NewBasketOrder>,
    ) -> Result<(), CoreError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        sqlx::query(
            "INSERT INTO baskets (basket_ref, user_id, deposit_id, account) VALUES ($1, $2, $3, $4)",
        )
        .bind(basket_ref)
        .bind(Uuid::from(user))
        .bind(deposit.map(Uuid::from))
        .bind(account)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        for order in orders {
            sqlx::query(
                "INSERT INTO basket_orders (id, basket_ref, symbol, client_order_id, weight, amount) \
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(Uuid::new_v4())
            .bind(basket_ref)
            .bind(&order.symbol)
            .bind(&order.client_order_id)
            .bind(order.weight)
            .bind(order.amount)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn set_broker_order_id(
        &self,
        client_order_id: &str,
        broker_order_id: &str,
    ) -> Result<(), CoreError> {
        sqlx::query("UPDATE basket_orders SET broker_order_id = $1 WHERE client_order_id = $2")
            .bind(broker_order_id)
            .bind(client_order_id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn list_orders(&self, basket_ref: &str) -> Result<Vec<BasketOrderRow>, CoreError> {
        let rows = sqlx::query(
            "SELECT symbol, client_order_id, broker_order_id, status FROM basket_orders WHERE basket_ref = $1",
        )
        .bind(basket_ref)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(rows
            .into_iter()
            .map(|r| BasketOrderRow {
                symbol: r.get("symbol"),
                client_order_id: r.get("client_order_id"),
                broker_order_id: r.get("broker_order_id"),
                status: r.get("status"),
            })
            .collect())
    }

    async fn set_basket_status(&self, basket_ref: &str, status: &str) -> Result<(), CoreError> {
        sqlx::query("UPDATE baskets SET status = $1 WHERE basket_ref = $2")
            .bind(status)
            .bind(basket_ref)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn find_basket(&self, basket_ref: &str) -> Result<Option<BasketMeta>, CoreError> {
        let row = sqlx::query(
            "SELECT user_id, deposit_id, account, status FROM baskets WHERE basket_ref = $1",
        )
        .bind(basket_ref)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(row.map(|r| {
            let user_id: Uuid = r.get("user_id");
            let deposit_id: Option<Uuid> = r.get("deposit_id");
            BasketMeta {
                user_id: UserId::from(user_id),
                deposit_id: deposit_id.map(DepositId::from),
                account: r.get("account"),
                status: r.get("status"),
            }
        }))
    }
}
