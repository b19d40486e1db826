use crate::error::AdapterError;
use async_trait::async_trait;
use funding_common::{Currency, Money};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VirtualAccountRef {
    pub provider_account_id: String,
    pub account_number: String,
    pub routing_number_or_iban: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiatDepositEvent {
    pub virtual_account_id: String,
    pub amount: Money,
    pub currency: Currency,
    pub transaction_ref: String,
    pub status: String,
}

/// Fiat virtual-account contract.
#[async_trait]
pub trait FiatVirtualAccountAdapter: Send + Sync {
    async fn create_virtual_account(
        &self,
        customer: &str,
        currency: Currency,
        destination: &str,
    ) -> Result<VirtualAccountRef, AdapterError>;

    async fn process_fiat_deposit_event(
        &self,
        event: FiatDepositEvent,
    ) -> Result<(), AdapterError>;
}
