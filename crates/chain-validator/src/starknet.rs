use crate::rpc::json_rpc_call;
use crate::{ChainValidator, TransactionStatus};
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use tracing::warn;

const TXN_HASH_NOT_FOUND: i64 = 29;

pub struct StarknetValidator {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl StarknetValidator {
    pub fn new(client: reqwest::Client, url: String, timeout: Duration) -> Self {
        Self { client, url, timeout }
    }
}

#[async_trait]
impl ChainValidator for StarknetValidator {
    async fn validate_transaction(&self, tx_hash: &str) -> TransactionStatus {
        let response = match json_rpc_call(
            &self.client,
            &self.url,
            "starknet_getTransactionReceipt",
            json!([tx_hash]),
            self.timeout,
        )
        .await
        {
            Some(resp) => resp,
            None => {
                warn!(tx_hash, "starknet rpc unreachable, treating as pending");
                return TransactionStatus::Pending;
            }
        };

        if let Some(error) = response.get("error") {
            let code = error.get("code").and_then(|c| c.as_i64());
            return if code == Some(TXN_HASH_NOT_FOUND) {
                TransactionStatus::NotFound
            } else {
                TransactionStatus::Pending
            };
        }

        let status = response
            .get("result")
            .and_then(|r| r.get("finality_status"))
            .and_then(|v| v.as_str());
        match status {
            Some("ACCEPTED_ON_L1") | Some("ACCEPTED_ON_L2") => TransactionStatus::Confirmed,
            Some("REJECTED") => TransactionStatus::Failed,
            _ => TransactionStatus::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_rpc_yields_pending() {
        let validator = StarknetValidator::new(
            reqwest::Client::new(),
            "http://127.0.0.1:1".to_string(),
            Duration::from_millis(200),
        );
        assert_eq!(validator.validate_transaction("0xabc").await, TransactionStatus::Pending);
    }
}
