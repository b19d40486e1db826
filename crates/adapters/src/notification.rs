use crate::error::AdapterError;
use async_trait::async_trait;
use funding_common::{DepositId, Money, UserId};

/// Notification contract. Callers must never propagate failures from this
/// adapter — they log and swallow.
#[async_trait]
pub trait NotificationAdapter: Send + Sync {
    async fn notify_deposit_confirmed(
        &self,
        user: UserId,
        deposit: DepositId,
    ) -> Result<(), AdapterError>;

    async fn notify_funding_success(
        &self,
        user: UserId,
        deposit: DepositId,
    ) -> Result<(), AdapterError>;

    async fn notify_funding_failure(
        &self,
        user: UserId,
        deposit: DepositId,
        reason: &str,
    ) -> Result<(), AdapterError>;

    async fn notify_large_balance_change(
        &self,
        user: UserId,
        amount: Money,
    ) -> Result<(), AdapterError>;
}
