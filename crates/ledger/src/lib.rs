//! Business-layer wrapper over [`funding_storage::LedgerRepository`] adding
//! an injectable, TTL-bounded balance read cache. The cache is a capability
//! passed in by the caller, not an ambient global: callers that don't want
//! caching simply pass `None` and every read goes straight to storage.

use funding_common::{CoreError, LedgerTransactionId, TransactionType, UserId};
use funding_storage::{Balances, LedgerRepository, LedgerTransactionRecord, NewEntry};
use moka::sync::Cache;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Read-through cache capability for per-user balances. Implementations
/// must be safe to share across worker tasks.
pub trait BalanceCache: Send + Sync {
    fn get(&self, user: UserId) -> Option<Balances>;
    fn put(&self, user: UserId, balances: Balances);
    fn invalidate(&self, user: UserId);
}

/// `moka::sync::Cache`-backed [`BalanceCache`] with a fixed per-entry TTL.
pub struct MokaBalanceCache {
    inner: Cache<Uuid, Balances>,
}

impl MokaBalanceCache {
    pub fn new(ttl: Duration, max_capacity: u64) -> Self {
        Self {
            inner: Cache::builder()
                .time_to_live(ttl)
                .max_capacity(max_capacity)
                .build(),
        }
    }
}

impl BalanceCache for MokaBalanceCache {
    fn get(&self, user: UserId) -> Option<Balances> {
        self.inner.get(&user.into())
    }

    fn put(&self, user: UserId, balances: Balances) {
        self.inner.insert(user.into(), balances);
    }

    fn invalidate(&self, user: UserId) {
        self.inner.invalidate(&user.into());
    }
}

/// Ledger facade consumed by every other component that needs to post or
/// read balances: wraps the repository, invalidating (rather than updating)
/// the cache on write so a concurrent reader never observes a stale hit
/// immediately after a commit.
#[derive(Clone)]
pub struct Ledger {
    repo: Arc<dyn LedgerRepository>,
    cache: Option<Arc<dyn BalanceCache>>,
}

impl Ledger {
    pub fn new(repo: Arc<dyn LedgerRepository>, cache: Option<Arc<dyn BalanceCache>>) -> Self {
        Self { repo, cache }
    }

    pub async fn post_transaction(
        &self,
        user: UserId,
        transaction_type: TransactionType,
        reference_id: Option<Uuid>,
        reference_type: Option<&str>,
        metadata: Value,
        entries: Vec<NewEntry>,
    ) -> Result<LedgerTransactionId, CoreError> {
        let id = self
            .repo
            .post_transaction(user, transaction_type, reference_id, reference_type, metadata, entries)
            .await?;
        if let Some(cache) = &self.cache {
            cache.invalidate(user);
        }
        funding_metrics::ledger::record_transaction_posted(transaction_type.as_str());
        Ok(id)
    }

    pub async fn get_balances(&self, user: UserId) -> Result<Balances, CoreError> {
        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.get(user) {
                funding_metrics::ledger::record_balance_cache_hit();
                return Ok(hit);
            }
            funding_metrics::ledger::record_balance_cache_miss();
            let balances = self.repo.get_balances(user).await?;
            cache.put(user, balances);
            return Ok(balances);
        }
        self.repo.get_balances(user).await
    }

    pub async fn get_transactions(
        &self,
        user: UserId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<LedgerTransactionRecord>, CoreError> {
        self.repo.get_transactions(user, limit, offset).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use funding_common::{AccountType, EntryDirection, Money};
    use funding_storage::memory::InMemoryLedger;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingCache {
        inner: MokaBalanceCache,
        hits: AtomicUsize,
        misses: AtomicUsize,
    }

    impl CountingCache {
        fn new() -> Self {
            Self {
                inner: MokaBalanceCache::new(Duration::from_secs(60), 100),
                hits: AtomicUsize::new(0),
                misses: AtomicUsize::new(0),
            }
        }
    }

    impl BalanceCache for CountingCache {
        fn get(&self, user: UserId) -> Option<Balances> {
            let value = self.inner.get(user);
            if value.is_some() {
                self.hits.fetch_add(1, Ordering::SeqCst);
            } else {
                self.misses.fetch_add(1, Ordering::SeqCst);
            }
            value
        }

        fn put(&self, user: UserId, balances: Balances) {
            self.inner.put(user, balances);
        }

        fn invalidate(&self, user: UserId) {
            self.inner.invalidate(user);
        }
    }

    #[tokio::test]
    async fn cache_hit_after_first_read_and_invalidated_on_write() {
        let repo = Arc::new(InMemoryLedger::new());
        let cache = Arc::new(CountingCache::new());
        let ledger = Ledger::new(repo, Some(cache.clone()));
        let user = UserId::new();

        ledger.get_balances(user).await.unwrap();
        ledger.get_balances(user).await.unwrap();
        assert_eq!(cache.misses.load(Ordering::SeqCst), 1);
        assert_eq!(cache.hits.load(Ordering::SeqCst), 1);

        ledger
            .post_transaction(
                user,
                TransactionType::Deposit,
                None,
                None,
                serde_json::json!({}),
                vec![
                    NewEntry::user(AccountType::UsdcBalance, user, EntryDirection::Credit, Money::new(dec!(10))),
                    NewEntry::system(AccountType::DepositSuspense, EntryDirection::Debit, Money::new(dec!(10))),
                ],
            )
            .await
            .unwrap();

        ledger.get_balances(user).await.unwrap();
        assert_eq!(cache.misses.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn no_cache_always_reads_through() {
        let repo = Arc::new(InMemoryLedger::new());
        let ledger = Ledger::new(repo, None);
        let user = UserId::new();
        let balances = ledger.get_balances(user).await.unwrap();
        assert!(balances.usdc_balance.is_zero());
    }
}
