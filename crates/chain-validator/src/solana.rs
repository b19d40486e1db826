use crate::rpc::json_rpc_call;
use crate::{ChainValidator, TransactionStatus};
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use tracing::warn;

pub struct SolanaValidator {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl SolanaValidator {
    pub fn new(client: reqwest::Client, url: String, timeout: Duration) -> Self {
        Self { client, url, timeout }
    }
}

#[async_trait]
impl ChainValidator for SolanaValidator {
    async fn validate_transaction(&self, tx_hash: &str) -> TransactionStatus {
        let response = match json_rpc_call(
            &self.client,
            &self.url,
            "getTransaction",
            json!([tx_hash, { "commitment": "finalized", "maxSupportedTransactionVersion": 0 }]),
            self.timeout,
        )
        .await
        {
            Some(resp) => resp,
            None => {
                warn!(tx_hash, "solana rpc unreachable, treating as pending");
                return TransactionStatus::Pending;
            }
        };

        match response.get("result") {
            None | Some(serde_json::Value::Null) => TransactionStatus::NotFound,
            Some(result) => match result.get("meta").and_then(|m| m.get("err")) {
                Some(serde_json::Value::Null) | None => TransactionStatus::Confirmed,
                Some(_) => TransactionStatus::Failed,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_rpc_yields_pending() {
        let validator = SolanaValidator::new(
            reqwest::Client::new(),
            "http://127.0.0.1:1".to_string(),
            Duration::from_millis(200),
        );
        assert_eq!(validator.validate_transaction("sig").await, TransactionStatus::Pending);
    }
}
