use serde_json::{json, Value};
use std::time::Duration;

/// Minimal JSON-RPC 2.0 POST helper shared by the EVM, Solana, and Starknet
/// validators. Returns the full decoded response object (which may itself
/// carry a top-level `"error"` field) or `None` if the request could not be
/// completed at all — a connection failure, a timeout, or a body that isn't
/// valid JSON. Callers treat `None` as "network error", which every
/// validator maps to `TransactionStatus::Pending`.
pub async fn json_rpc_call(
    client: &reqwest::Client,
    url: &str,
    method: &str,
    params: Value,
    timeout: Duration,
) -> Option<Value> {
    let body = json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": method,
        "params": params,
    });

    let response = client.post(url).timeout(timeout).json(&body).send().await.ok()?;
    response.json::<Value>().await.ok()
}
