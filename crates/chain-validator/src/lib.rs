//! One `ChainValidator` trait, implemented once per chain family behind
//! native RPC. Every implementation treats a network error as `Pending`
//! rather than propagating a retryable error or guessing `NotFound` — the
//! job stays in the queue and is asked again on the next attempt.

mod aptos;
mod evm;
mod rpc;
mod solana;
mod starknet;

pub use aptos::AptosValidator;
pub use evm::EvmValidator;
pub use solana::SolanaValidator;
pub use starknet::StarknetValidator;

use async_trait::async_trait;
use funding_common::Chain;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Confirmed,
    Failed,
    Pending,
    NotFound,
}

#[async_trait]
pub trait ChainValidator: Send + Sync {
    async fn validate_transaction(&self, tx_hash: &str) -> TransactionStatus;
}

/// Builds the validator for a given chain, wiring in a shared `reqwest`
/// client and the configured RPC URL. Returns `None` for `Fiat` (no RPC
/// validator exists) or when no RPC URL was configured for that chain.
pub fn build_validator(
    chain: Chain,
    rpc_url: Option<&str>,
    timeout: Duration,
) -> Option<Arc<dyn ChainValidator>> {
    let url = rpc_url?.to_string();
    let client = reqwest::Client::new();
    Some(match chain.family() {
        funding_common::ChainFamily::Evm => {
            Arc::new(EvmValidator::new(client, url, timeout)) as Arc<dyn ChainValidator>
        }
        funding_common::ChainFamily::Solana => {
            Arc::new(SolanaValidator::new(client, url, timeout)) as Arc<dyn ChainValidator>
        }
        funding_common::ChainFamily::Aptos => {
            Arc::new(AptosValidator::new(client, url, timeout)) as Arc<dyn ChainValidator>
        }
        funding_common::ChainFamily::Starknet => {
            Arc::new(StarknetValidator::new(client, url, timeout)) as Arc<dyn ChainValidator>
        }
        funding_common::ChainFamily::Fiat => return None,
    })
}
