//! Builds the wired-up components `fundingd::run` drives, keeping "how to
//! construct a component" separate from `main`'s top-level flow.

use funding_adapters::fake::{FakeBrokerage, FakeChainCustody, FakeNotificationAdapter};
use funding_allocation::{AllocationEngine, NoopLimits};
use funding_brokerage::{BrokerageBridge, BrokerageSweepConfig};
use funding_chain_validator::{build_validator, ChainValidator};
use funding_common::Chain;
use funding_config::Config;
use funding_idempotency::IdempotencyService;
use funding_jobqueue::{JobQueue, RetryPolicy};
use funding_ledger::{Ledger, MokaBalanceCache};
use funding_processor::{ProcessorConfig, WebhookProcessor};
use funding_reconciliation::{ReconciliationConfig, ReconciliationEngine};
use funding_storage::Storage;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{filter::Directive, fmt, layer::SubscriberExt, reload, EnvFilter, Registry};

const ALL_RPC_CHAINS: [Chain; 8] = [
    Chain::Ethereum,
    Chain::Polygon,
    Chain::Arbitrum,
    Chain::Optimism,
    Chain::Base,
    Chain::Solana,
    Chain::Aptos,
    Chain::Starknet,
];

pub fn init_tracing() -> reload::Handle<EnvFilter, Registry> {
    let log_filter = EnvFilter::builder()
        .with_default_directive(Directive::from(tracing::Level::INFO))
        .from_env_lossy();
    let (filter, filter_handle) = reload::Layer::new(log_filter);
    let subscriber = Registry::default().with(fmt::layer().with_filter(filter));
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");
    filter_handle
}

pub async fn init_storage(config: &Config) -> eyre::Result<Storage> {
    let pool = funding_storage::connect(&config.database_url, config.database_max_connections).await?;
    Ok(Storage::new(pool))
}

/// The background components `fundingd::run` drives to completion, plus the
/// optional metrics listen address (host, port) if the metrics server should
/// be started alongside them.
pub struct Components {
    pub processor: WebhookProcessor,
    pub reconciliation: ReconciliationEngine,
    pub brokerage: BrokerageBridge,
    pub brokerage_sweep: BrokerageSweepConfig,
    pub idempotency: Arc<IdempotencyService>,
    pub metrics_listen_addr: Option<(String, u16)>,
}

pub fn build_components(config: &Config, storage: Storage) -> eyre::Result<Components> {
    funding_metrics::initialize_recorder().map_err(|err| eyre::eyre!(err.to_string()))?;

    let cache = Arc::new(MokaBalanceCache::new(config.balance_cache_ttl(), 10_000));
    let ledger = Ledger::new(storage.ledger.clone(), Some(cache));

    let chain_custody = Arc::new(FakeChainCustody::new());
    let notification = Arc::new(FakeNotificationAdapter::default());
    let limits = Arc::new(NoopLimits);

    let allocation = Arc::new(AllocationEngine::new(
        storage.deposits.clone(),
        storage.wallets.clone(),
        ledger.clone(),
        storage.audit.clone(),
        chain_custody,
        notification,
        limits,
        funding_common::Money::new(config.min_deposit()?),
        funding_common::Money::new(config.large_deposit_threshold()?),
    ));

    let retry_policy = RetryPolicy::new(
        Duration::from_millis(config.retry_base_ms),
        Duration::from_millis(config.retry_cap_ms),
        config.max_retries,
    );
    let queue = JobQueue::new(storage.jobs.clone(), retry_policy);

    let processor = WebhookProcessor::new(
        queue.clone(),
        allocation.clone(),
        ProcessorConfig {
            worker_count: config.worker_count,
            poll_interval: config.worker_poll_interval(),
            job_lease: chrono::Duration::seconds(config.worker_job_timeout_seconds as i64),
            circuit_threshold: config.circuit_threshold,
            circuit_timeout: config.circuit_timeout(),
        },
    );

    let mut validators: HashMap<Chain, Arc<dyn ChainValidator>> = HashMap::new();
    for chain in ALL_RPC_CHAINS {
        if let Some(validator) = build_validator(chain, config.rpc_url_for(chain), config.chain_rpc_timeout()) {
            validators.insert(chain, validator);
        }
    }

    let reconciliation = ReconciliationEngine::new(
        queue,
        storage.deposits.clone(),
        storage.wallets.clone(),
        allocation,
        storage.audit.clone(),
        validators,
        ReconciliationConfig {
            interval: config.reconciliation_interval(),
            threshold: config.reconciliation_threshold(),
            not_found_grace: chrono::Duration::hours(1),
            batch_size: config.reconciliation_batch_size,
            concurrency: config.reconciliation_concurrency,
        },
    );

    let idempotency = Arc::new(IdempotencyService::new(
        storage.idempotency.clone(),
        config.idempotency_hmac_secret.as_bytes(),
        config.idempotency_ttl(),
    ));

    let brokerage = BrokerageBridge::new(
        Arc::new(FakeBrokerage::new()),
        storage.brokerage_accounts.clone(),
        storage.baskets.clone(),
        storage.deposits.clone(),
        ledger,
        storage.audit.clone(),
    );

    let metrics_listen_addr = parse_listen_addr(&config.metrics_listen_addr);

    Ok(Components {
        processor,
        reconciliation,
        brokerage,
        brokerage_sweep: BrokerageSweepConfig::default(),
        idempotency,
        metrics_listen_addr,
    })
}

fn parse_listen_addr(addr: &str) -> Option<(String, u16)> {
    let (host, port) = addr.rsplit_once(':')?;
    let port: u16 = port.parse().ok()?;
    Some((host.to_string(), port))
}
