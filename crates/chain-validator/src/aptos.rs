use crate::{ChainValidator, TransactionStatus};
use async_trait::async_trait;
use std::time::Duration;
use tracing::warn;

pub struct AptosValidator {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl AptosValidator {
    pub fn new(client: reqwest::Client, base_url: String, timeout: Duration) -> Self {
        Self { client, base_url, timeout }
    }
}

#[async_trait]
impl ChainValidator for AptosValidator {
    async fn validate_transaction(&self, tx_hash: &str) -> TransactionStatus {
        let url = format!("{}/transactions/by_hash/{}", self.base_url.trim_end_matches('/'), tx_hash);
        let response = match self.client.get(&url).timeout(self.timeout).send().await {
            Ok(resp) => resp,
            Err(_) => {
                warn!(tx_hash, "aptos rpc unreachable, treating as pending");
                return TransactionStatus::Pending;
            }
        };

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return TransactionStatus::NotFound;
        }

        let body: serde_json::Value = match response.json().await {
            Ok(body) => body,
            Err(_) => return TransactionStatus::Pending,
        };

        match body.get("type").and_then(|v| v.as_str()) {
            Some("pending_transaction") => TransactionStatus::Pending,
            _ => match body.get("success").and_then(|v| v.as_bool()) {
                Some(true) => TransactionStatus::Confirmed,
                Some(false) => TransactionStatus::Failed,
                None => TransactionStatus::Pending,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_rpc_yields_pending() {
        let validator = AptosValidator::new(
            reqwest::Client::new(),
            "http://127.0.0.1:1".to_string(),
            Duration::from_millis(200),
        );
        assert_eq!(validator.validate_transaction("0xabc").await, TransactionStatus::Pending);
    }
}
