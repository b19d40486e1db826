//! Component wiring for the `fundingd` binary: turns a parsed [`Config`]
//! into the running set of background components (webhook processor,
//! reconciliation sweep, brokerage funding sweep, idempotency reaper,
//! metrics server) and joins them on shutdown.

pub mod initializers;

use funding_config::Config;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

pub use initializers::{init_storage, init_tracing, Components};

/// Runs every background component until `shutdown` is cancelled, then waits
/// up to `config.shutdown_grace()` for in-flight work to drain before
/// returning.
pub async fn run(config: Config, components: Components, shutdown: CancellationToken) {
    let tracker = TaskTracker::new();

    let processor_shutdown = shutdown.clone();
    tracker.spawn(components.processor.run(processor_shutdown));

    let reconciliation_shutdown = shutdown.clone();
    tracker.spawn(components.reconciliation.run(reconciliation_shutdown));

    let brokerage_shutdown = shutdown.clone();
    tracker.spawn(components.brokerage.run(components.brokerage_sweep, brokerage_shutdown));

    let idempotency = components.idempotency.clone();
    let reap_interval = config.idempotency_ttl().to_std().unwrap_or(Duration::from_secs(3600)).min(Duration::from_secs(3600));
    let reaper_shutdown = shutdown.clone();
    tracker.spawn(async move {
        run_idempotency_reaper(idempotency, reap_interval, reaper_shutdown).await;
    });

    if let Some((host, port)) = components.metrics_listen_addr {
        tracker.spawn(async move {
            if let Err(err) = funding_metrics::start_metrics_server(&host, port).await {
                warn!(%err, "metrics server exited");
            }
        });
    }

    tracker.close();
    tracker.wait().await;
    info!("fundingd stopped");
}

async fn run_idempotency_reaper(
    idempotency: std::sync::Arc<funding_idempotency::IdempotencyService>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    info!("idempotency reaper started");
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(err) = idempotency.reap_expired().await {
                    warn!(%err, "idempotency reap tick failed");
                }
            }
            _ = shutdown.cancelled() => break,
        }
    }
    info!("idempotency reaper stopped");
}
