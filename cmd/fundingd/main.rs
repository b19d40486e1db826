use clap::Parser;
use fundingd::initializers::{build_components, init_storage, init_tracing};
use funding_config::Config;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let _log_filter_handle = init_tracing();

    let config = Config::parse();
    info!(worker_count = config.worker_count, "starting fundingd");

    let storage = init_storage(&config).await?;
    let components = build_components(&config, storage)?;

    let shutdown = CancellationToken::new();
    let run_shutdown = shutdown.clone();
    let grace = config.shutdown_grace();
    let run_handle = tokio::spawn(fundingd::run(config, components, run_shutdown));

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, draining in-flight work");
    shutdown.cancel();

    if tokio::time::timeout(grace, run_handle).await.is_err() {
        tracing::warn!("shutdown grace period elapsed before all components stopped");
    }

    Ok(())
}
