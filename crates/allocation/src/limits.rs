use async_trait::async_trait;
use funding_common::{CoreError, Money, UserId};

/// Per-user deposit limit check, hung off the allocation path as its own
/// capability so a real implementation (daily caps, velocity checks) can be
/// swapped in without touching `process_chain_deposit`. The default allows
/// everything: limit enforcement is an external collaborator this core does
/// not itself define policy for.
#[async_trait]
pub trait DepositLimits: Send + Sync {
    async fn validate(&self, user: UserId, usd: Money) -> Result<(), CoreError>;

    /// Best-effort bookkeeping after a deposit clears; failures here must
    /// never fail the deposit.
    async fn record_deposit(&self, user: UserId, usd: Money);
}

#[derive(Default)]
pub struct NoopLimits;

#[async_trait]
impl DepositLimits for NoopLimits {
    async fn validate(&self, _user: UserId, _usd: Money) -> Result<(), CoreError> {
        Ok(())
    }

    async fn record_deposit(&self, _user: UserId, _usd: Money) {}
}
