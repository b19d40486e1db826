use crate::error::AdapterError;
use async_trait::async_trait;
use funding_common::{Chain, Money, UserId};

/// Chain custody contract. Generates deposit addresses, confirms a specific
/// on-chain transfer, and prices it in USD. Custody of private keys is
/// entirely outsourced; this crate only describes the shape of the
/// boundary.
#[async_trait]
pub trait ChainCustodyAdapter: Send + Sync {
    async fn generate_deposit_address(
        &self,
        user: UserId,
        chain: Chain,
    ) -> Result<String, AdapterError>;

    /// Returns `(is_valid, reason)`. `reason` is populated on rejection for
    /// audit/failure-message purposes.
    async fn validate_deposit(
        &self,
        tx_hash: &str,
        amount: Money,
    ) -> Result<(bool, String), AdapterError>;

    async fn convert_to_usd(&self, amount: Money, token: &str) -> Result<Money, AdapterError>;
}
