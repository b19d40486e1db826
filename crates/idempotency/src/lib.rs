//! Business layer over [`funding_storage::IdempotencyRepository`]: computes
//! the two hash shapes the core needs (HTTP-edge request hash, event-edge
//! synthetic dedup key) and exposes a TTL sweep for expired records.

use chrono::{DateTime, Duration, Utc};
use funding_common::CoreError;
use funding_storage::{IdempotencyRecord, IdempotencyRepository};
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use std::sync::Arc;
use tracing::info;

type HmacSha256 = Hmac<Sha256>;

/// Result of checking an idempotency key against the store.
pub enum IdempotencyCheck {
    /// No record existed; the caller should proceed and then [`IdempotencyService::put`].
    Fresh,
    /// A record existed with a matching hash; replay its stored response.
    Replay(IdempotencyRecord),
}

#[derive(Clone)]
pub struct IdempotencyService {
    repo: Arc<dyn IdempotencyRepository>,
    secret: Vec<u8>,
    ttl: Duration,
}

impl IdempotencyService {
    pub fn new(repo: Arc<dyn IdempotencyRepository>, secret: impl AsRef<[u8]>, ttl: Duration) -> Self {
        Self {
            repo,
            secret: secret.as_ref().to_vec(),
            ttl,
        }
    }

    fn hmac_hex(&self, parts: &[&str]) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.secret).expect("hmac accepts any key length");
        for part in parts {
            mac.update(part.as_bytes());
            mac.update(b"\0");
        }
        hex::encode(mac.finalize().into_bytes())
    }

    /// `request_hash = H(path || method || body)`, the HTTP-edge idempotency
    /// key payload hash.
    pub fn request_hash(&self, path: &str, method: &str, body: &str) -> String {
        self.hmac_hex(&[path, method, body])
    }

    /// Checks an `Idempotency-Key` against the store: a missing record means
    /// proceed; a matching hash means replay; a mismatched hash is a
    /// conflict.
    pub async fn check(
        &self,
        key: &str,
        path: &str,
        method: &str,
        body: &str,
    ) -> Result<IdempotencyCheck, CoreError> {
        match self.repo.get(key).await? {
            None => Ok(IdempotencyCheck::Fresh),
            Some(record) if record.request_hash == self.request_hash(path, method, body) => {
                Ok(IdempotencyCheck::Replay(record))
            }
            Some(_) => Err(CoreError::ConflictingIdempotencyKey),
        }
    }

    pub async fn put(
        &self,
        key: &str,
        path: &str,
        method: &str,
        body: &str,
        response_status: i32,
        response_body: Value,
    ) -> Result<(), CoreError> {
        self.repo
            .put(IdempotencyRecord {
                key: key.to_string(),
                request_path: path.to_string(),
                request_method: method.to_string(),
                request_hash: self.request_hash(path, method, body),
                response_status,
                response_body,
                expires_at: Utc::now() + self.ttl,
            })
            .await
    }

    /// Synthetic dedup key for the event edge: `H(provider_event_id ||
    /// minute_bucket)`. Events that land in the same wall-clock minute
    /// collapse onto one key; combined with the (chain, tx_hash) uniqueness
    /// on jobs, this catches webhook redelivery without a caller-supplied
    /// key.
    pub fn event_dedup_key(&self, provider_event_id: &str, received_at: DateTime<Utc>) -> String {
        let minute_bucket = received_at.timestamp() / 60;
        self.hmac_hex(&[provider_event_id, &minute_bucket.to_string()])
    }

    /// Sweeps expired records; returns the count removed. Intended to run
    /// on a periodic ticker owned by the caller.
    pub async fn reap_expired(&self) -> Result<u64, CoreError> {
        let removed = self.repo.reap_expired().await?;
        if removed > 0 {
            info!(removed, "reaped expired idempotency records");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use funding_storage::memory::InMemoryIdempotency;

    fn service() -> IdempotencyService {
        IdempotencyService::new(Arc::new(InMemoryIdempotency::new()), b"test-secret", Duration::hours(24))
    }

    #[tokio::test]
    async fn fresh_key_then_replay() {
        let svc = service();
        let check = svc.check("key-1", "/x", "POST", "{}").await.unwrap();
        assert!(matches!(check, IdempotencyCheck::Fresh));

        svc.put("key-1", "/x", "POST", "{}", 202, serde_json::json!({"ok": true}))
            .await
            .unwrap();

        let check = svc.check("key-1", "/x", "POST", "{}").await.unwrap();
        assert!(matches!(check, IdempotencyCheck::Replay(_)));
    }

    #[tokio::test]
    async fn mismatched_hash_conflicts() {
        let svc = service();
        svc.put("key-2", "/x", "POST", "{\"a\":1}", 202, serde_json::json!({}))
            .await
            .unwrap();

        let err = svc.check("key-2", "/x", "POST", "{\"a\":2}").await.unwrap_err();
        assert!(matches!(err, CoreError::ConflictingIdempotencyKey));
    }

    #[test]
    fn event_dedup_key_stable_within_minute_bucket() {
        let svc = service();
        let t1 = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let t2 = DateTime::from_timestamp(1_700_000_030, 0).unwrap();
        assert_eq!(svc.event_dedup_key("evt-1", t1), svc.event_dedup_key("evt-1", t2));
    }

    #[test]
    fn event_dedup_key_differs_across_minute_bucket() {
        let svc = service();
        let t1 = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let t2 = DateTime::from_timestamp(1_700_000_090, 0).unwrap();
        assert_ne!(svc.event_dedup_key("evt-1", t1), svc.event_dedup_key("evt-1", t2));
    }

    proptest::proptest! {
        #[test]
        fn request_hash_is_a_pure_function_of_its_inputs(
            path in "[a-z/]{1,20}",
            method in "GET|POST|PUT",
            body in "\\PC{0,40}",
        ) {
            let svc = service();
            let a = svc.request_hash(&path, &method, &body);
            let b = svc.request_hash(&path, &method, &body);
            proptest::prop_assert_eq!(a, b);
        }

        #[test]
        fn different_body_almost_never_collides(
            path in "[a-z/]{1,20}",
            method in "GET|POST|PUT",
            body_a in "\\PC{1,40}",
            body_b in "\\PC{1,40}",
        ) {
            proptest::prop_assume!(body_a != body_b);
            let svc = service();
            proptest::prop_assert_ne!(
                svc.request_hash(&path, &method, &body_a),
                svc.request_hash(&path, &method, &body_b)
            );
        }
    }
}
