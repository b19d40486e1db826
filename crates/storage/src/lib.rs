//! Postgres-backed persistence for every aggregate the core tracks: one
//! crate owning all durable state, realized over `sqlx::PgPool` rather than
//! an embedded key-value engine, since these aggregates are relational
//! (uniqueness constraints, row locks, indexed sweeps) rather than a trie.

pub mod audit;
pub mod baskets;
pub mod brokerage_account;
pub mod deposits;
pub mod error;
pub mod jobs;
pub mod ledger;
pub mod memory;
pub mod virtual_accounts;

pub use audit::{AuditLogRepository, PgAuditLogRepository};
pub use baskets::{BasketMeta, BasketOrderRow, BasketRepository, NewBasketOrder, PgBasketRepository};
pub use brokerage_account::{BrokerageAccount, BrokerageAccountRepository, PgBrokerageAccountRepository};
pub use deposits::{DepositRepository, PgDepositRepository, PgWalletRepository, WalletRepository};
pub use error::map_sqlx_error;
pub use idempotency::{IdempotencyRecord, IdempotencyRepository, PgIdempotencyRepository};
pub use jobs::{FundingEventJob, JobMetrics, JobRepository, NewFundingEventJob, PgJobRepository, ProcessingLogEntry};
pub use ledger::{Balances, LedgerRepository, LedgerTransactionRecord, NewEntry, PgLedgerRepository};
pub use virtual_accounts::{NewVirtualAccount, PgVirtualAccountRepository, VirtualAccountRepository};

pub mod idempotency;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

/// Connects to Postgres and runs embedded migrations. `max_connections`
/// should be sized to the sum of worker pool size, reconciliation
/// concurrency, and HTTP edge concurrency.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    Ok(pool)
}

/// Bundles one repository impl per aggregate behind a single handle, wired
/// once at startup and cloned into every component.
#[derive(Clone)]
pub struct Storage {
    pub ledger: std::sync::Arc<dyn LedgerRepository>,
    pub deposits: std::sync::Arc<dyn DepositRepository>,
    pub wallets: std::sync::Arc<dyn WalletRepository>,
    pub virtual_accounts: std::sync::Arc<dyn VirtualAccountRepository>,
    pub jobs: std::sync::Arc<dyn JobRepository>,
    pub idempotency: std::sync::Arc<dyn IdempotencyRepository>,
    pub audit: std::sync::Arc<dyn AuditLogRepository>,
    pub baskets: std::sync::Arc<dyn BasketRepository>,
    pub brokerage_accounts: std::sync::Arc<dyn BrokerageAccountRepository>,
}

impl Storage {
    pub fn new(pool: PgPool) -> Self {
        Self {
            ledger: std::sync::Arc::new(PgLedgerRepository::new(pool.clone())),
            deposits: std::sync::Arc::new(PgDepositRepository::new(pool.clone())),
            wallets: std::sync::Arc::new(PgWalletRepository::new(pool.clone())),
            virtual_accounts: std::sync::Arc::new(PgVirtualAccountRepository::new(pool.clone())),
            jobs: std::sync::Arc::new(PgJobRepository::new(pool.clone())),
            idempotency: std::sync::Arc::new(PgIdempotencyRepository::new(pool.clone())),
            audit: std::sync::Arc::new(PgAuditLogRepository::new(pool.clone())),
            baskets: std::sync::Arc::new(PgBasketRepository::new(pool.clone())),
            brokerage_accounts: std::sync::Arc::new(PgBrokerageAccountRepository::new(pool)),
        }
    }
}
