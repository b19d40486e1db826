//! Environment-driven configuration for every component wired up by the
//! `fundingd` binary. One `clap::Parser` struct covers the whole process;
//! each field doubles as a CLI flag and an environment variable so the same
//! binary runs unchanged from a shell or an orchestrator.

use clap::Parser;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid decimal for {field}: {value}")]
    InvalidDecimal { field: &'static str, value: String },
}

#[derive(Parser, Debug, Clone)]
#[command(name = "fundingd", about = "Deposit-funding core service")]
pub struct Config {
    #[arg(
        long,
        env = "DATABASE_URL",
        help_heading = "Storage",
        help = "Postgres connection string"
    )]
    pub database_url: String,

    #[arg(
        long,
        env = "DATABASE_MAX_CONNECTIONS",
        help_heading = "Storage",
        default_value_t = 20
    )]
    pub database_max_connections: u32,

    #[arg(
        long,
        env = "WORKER_COUNT",
        help_heading = "Processor",
        help = "Number of concurrent job-processing workers",
        default_value_t = 5
    )]
    pub worker_count: usize,

    #[arg(
        long,
        env = "WORKER_POLL_INTERVAL_MS",
        help_heading = "Processor",
        default_value_t = 500
    )]
    pub worker_poll_interval_ms: u64,

    #[arg(
        long,
        env = "WORKER_JOB_TIMEOUT_SECONDS",
        help_heading = "Processor",
        help = "Per-job processing timeout before the lease is abandoned",
        default_value_t = 60
    )]
    pub worker_job_timeout_seconds: u64,

    #[arg(long, env = "MAX_RETRIES", help_heading = "Processor", default_value_t = 5)]
    pub max_retries: i32,

    #[arg(
        long,
        env = "RETRY_BASE_MS",
        help_heading = "Processor",
        help = "Base delay for exponential backoff with full jitter",
        default_value_t = 1000
    )]
    pub retry_base_ms: u64,

    #[arg(
        long,
        env = "RETRY_CAP_MS",
        help_heading = "Processor",
        default_value_t = 300_000
    )]
    pub retry_cap_ms: u64,

    #[arg(
        long,
        env = "CIRCUIT_THRESHOLD",
        help_heading = "Processor",
        help = "Consecutive adapter failures before the circuit opens",
        default_value_t = 5
    )]
    pub circuit_threshold: u32,

    #[arg(
        long,
        env = "CIRCUIT_TIMEOUT_SECONDS",
        help_heading = "Processor",
        help = "How long the circuit stays open before a trial request",
        default_value_t = 60
    )]
    pub circuit_timeout_seconds: u64,

    #[arg(
        long,
        env = "RECONCILIATION_INTERVAL_SECONDS",
        help_heading = "Reconciliation",
        default_value_t = 600
    )]
    pub reconciliation_interval_seconds: u64,

    #[arg(
        long,
        env = "RECONCILIATION_THRESHOLD_SECONDS",
        help_heading = "Reconciliation",
        help = "Minimum age of a pending deposit before it's reconciled",
        default_value_t = 900
    )]
    pub reconciliation_threshold_seconds: u64,

    #[arg(
        long,
        env = "RECONCILIATION_BATCH_SIZE",
        help_heading = "Reconciliation",
        default_value_t = 100
    )]
    pub reconciliation_batch_size: i64,

    #[arg(
        long,
        env = "RECONCILIATION_CONCURRENCY",
        help_heading = "Reconciliation",
        default_value_t = 10
    )]
    pub reconciliation_concurrency: usize,

    #[arg(
        long,
        env = "IDEMPOTENCY_TTL_SECONDS",
        help_heading = "Idempotency",
        default_value_t = 86_400
    )]
    pub idempotency_ttl_seconds: u64,

    #[arg(
        long,
        env = "IDEMPOTENCY_HMAC_SECRET",
        help_heading = "Idempotency",
        help = "Key used to derive idempotency-key and event-dedup hashes",
        default_value = "change-me-in-production"
    )]
    pub idempotency_hmac_secret: String,

    #[arg(
        long,
        env = "BALANCE_CACHE_TTL_SECONDS",
        help_heading = "Ledger",
        help = "TTL for the injectable balance read cache; 0 disables caching",
        default_value_t = 5
    )]
    pub balance_cache_ttl_seconds: u64,

    #[arg(
        long,
        env = "MIN_DEPOSIT_USD",
        help_heading = "Allocation",
        default_value = "1.00"
    )]
    pub min_deposit_usd: String,

    #[arg(
        long,
        env = "LARGE_DEPOSIT_THRESHOLD_USD",
        help_heading = "Allocation",
        default_value = "10000.00"
    )]
    pub large_deposit_threshold_usd: String,

    #[arg(
        long,
        env = "CHAIN_RPC_TIMEOUT_SECONDS",
        help_heading = "Chain validation",
        default_value_t = 15
    )]
    pub chain_rpc_timeout_seconds: u64,

    #[arg(long, env = "ETHEREUM_RPC_URL", help_heading = "Chain validation")]
    pub ethereum_rpc_url: Option<String>,

    #[arg(long, env = "POLYGON_RPC_URL", help_heading = "Chain validation")]
    pub polygon_rpc_url: Option<String>,

    #[arg(long, env = "ARBITRUM_RPC_URL", help_heading = "Chain validation")]
    pub arbitrum_rpc_url: Option<String>,

    #[arg(long, env = "OPTIMISM_RPC_URL", help_heading = "Chain validation")]
    pub optimism_rpc_url: Option<String>,

    #[arg(long, env = "BASE_RPC_URL", help_heading = "Chain validation")]
    pub base_rpc_url: Option<String>,

    #[arg(long, env = "SOLANA_RPC_URL", help_heading = "Chain validation")]
    pub solana_rpc_url: Option<String>,

    #[arg(long, env = "APTOS_RPC_URL", help_heading = "Chain validation")]
    pub aptos_rpc_url: Option<String>,

    #[arg(long, env = "STARKNET_RPC_URL", help_heading = "Chain validation")]
    pub starknet_rpc_url: Option<String>,

    #[arg(
        long,
        env = "METRICS_LISTEN_ADDR",
        help_heading = "Observability",
        default_value = "0.0.0.0:9090"
    )]
    pub metrics_listen_addr: String,

    #[arg(
        long,
        env = "SHUTDOWN_GRACE_SECONDS",
        help_heading = "Runtime",
        help = "How long to let in-flight work drain after SIGTERM/SIGINT",
        default_value_t = 30
    )]
    pub shutdown_grace_seconds: u64,
}

impl Config {
    pub fn worker_poll_interval(&self) -> Duration {
        Duration::from_millis(self.worker_poll_interval_ms)
    }

    pub fn worker_job_timeout(&self) -> Duration {
        Duration::from_secs(self.worker_job_timeout_seconds)
    }

    pub fn circuit_timeout(&self) -> Duration {
        Duration::from_secs(self.circuit_timeout_seconds)
    }

    pub fn reconciliation_interval(&self) -> Duration {
        Duration::from_secs(self.reconciliation_interval_seconds)
    }

    pub fn reconciliation_threshold(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.reconciliation_threshold_seconds as i64)
    }

    pub fn idempotency_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.idempotency_ttl_seconds as i64)
    }

    pub fn balance_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.balance_cache_ttl_seconds)
    }

    pub fn chain_rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.chain_rpc_timeout_seconds)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }

    pub fn min_deposit(&self) -> Result<Decimal, ConfigError> {
        Decimal::from_str(&self.min_deposit_usd).map_err(|_| ConfigError::InvalidDecimal {
            field: "min_deposit_usd",
            value: self.min_deposit_usd.clone(),
        })
    }

    pub fn large_deposit_threshold(&self) -> Result<Decimal, ConfigError> {
        Decimal::from_str(&self.large_deposit_threshold_usd).map_err(|_| ConfigError::InvalidDecimal {
            field: "large_deposit_threshold_usd",
            value: self.large_deposit_threshold_usd.clone(),
        })
    }

    /// RPC URL for a given chain, if one was configured. `Fiat` always
    /// returns `None`: it has no RPC validator.
    pub fn rpc_url_for(&self, chain: funding_common::Chain) -> Option<&str> {
        use funding_common::Chain::*;
        match chain {
            Ethereum => self.ethereum_rpc_url.as_deref(),
            Polygon => self.polygon_rpc_url.as_deref(),
            Arbitrum => self.arbitrum_rpc_url.as_deref(),
            Optimism => self.optimism_rpc_url.as_deref(),
            Base => self.base_rpc_url.as_deref(),
            Solana => self.solana_rpc_url.as_deref(),
            Aptos => self.aptos_rpc_url.as_deref(),
            Starknet => self.starknet_rpc_url.as_deref(),
            Fiat => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> Vec<&'static str> {
        vec!["fundingd", "--database-url", "postgres://localhost/funding"]
    }

    #[test]
    fn defaults_parse() {
        let config = Config::parse_from(base_args());
        assert_eq!(config.worker_count, 5);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.min_deposit_usd, "1.00");
    }

    #[test]
    fn min_deposit_parses_as_decimal() {
        let config = Config::parse_from(base_args());
        assert_eq!(config.min_deposit().unwrap(), Decimal::from_str("1.00").unwrap());
    }

    #[test]
    fn rpc_url_for_fiat_is_none() {
        let config = Config::parse_from(base_args());
        assert!(config.rpc_url_for(funding_common::Chain::Fiat).is_none());
    }

    #[test]
    fn env_override_takes_effect() {
        std::env::set_var("WORKER_COUNT", "9");
        let config = Config::parse_from(base_args());
        assert_eq!(config.worker_count, 9);
        std::env::remove_var("WORKER_COUNT");
    }
}
