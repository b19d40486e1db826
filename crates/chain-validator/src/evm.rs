use crate::rpc::json_rpc_call;
use crate::{ChainValidator, TransactionStatus};
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use tracing::warn;

pub struct EvmValidator {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl EvmValidator {
    pub fn new(client: reqwest::Client, url: String, timeout: Duration) -> Self {
        Self { client, url, timeout }
    }
}

#[async_trait]
impl ChainValidator for EvmValidator {
    async fn validate_transaction(&self, tx_hash: &str) -> TransactionStatus {
        let receipt = match json_rpc_call(
            &self.client,
            &self.url,
            "eth_getTransactionReceipt",
            json!([tx_hash]),
            self.timeout,
        )
        .await
        {
            Some(resp) => resp,
            None => {
                warn!(tx_hash, "evm rpc unreachable, treating as pending");
                return TransactionStatus::Pending;
            }
        };

        match receipt.get("result") {
            Some(result) if !result.is_null() => {
                match result.get("status").and_then(|v| v.as_str()) {
                    Some("0x1") => TransactionStatus::Confirmed,
                    Some("0x0") => TransactionStatus::Failed,
                    _ => TransactionStatus::Pending,
                }
            }
            _ => self.fall_back_to_tx_by_hash(tx_hash).await,
        }
    }
}

impl EvmValidator {
    async fn fall_back_to_tx_by_hash(&self, tx_hash: &str) -> TransactionStatus {
        let response = match json_rpc_call(
            &self.client,
            &self.url,
            "eth_getTransactionByHash",
            json!([tx_hash]),
            self.timeout,
        )
        .await
        {
            Some(resp) => resp,
            None => {
                warn!(tx_hash, "evm rpc unreachable on fallback, treating as pending");
                return TransactionStatus::Pending;
            }
        };

        match response.get("result") {
            Some(result) if !result.is_null() => TransactionStatus::Pending,
            _ => TransactionStatus::NotFound,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_rpc_yields_pending() {
        let validator = EvmValidator::new(
            reqwest::Client::new(),
            "http://127.0.0.1:1".to_string(),
            Duration::from_millis(200),
        );
        assert_eq!(validator.validate_transaction("0xabc").await, TransactionStatus::Pending);
    }
}
