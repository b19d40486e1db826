//! Global Prometheus recorder setup using the `metrics` ecosystem: the
//! `metrics` crate's global recorder records everything call sites emit via
//! `counter!`/`gauge!`/`histogram!`, and [`render_metrics`] pulls it back out
//! in Prometheus text exposition format for an HTTP scrape.

use crate::error::MetricsError;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Installs the global recorder. Must be called once at startup before any
/// metric is recorded; a second call returns an error rather than silently
/// replacing the first recorder.
pub fn initialize_recorder() -> Result<(), MetricsError> {
    let builder = PrometheusBuilder::new();
    let recorder = builder.build_recorder();
    let handle = recorder.handle();

    metrics::set_global_recorder(recorder)
        .map_err(|e| MetricsError::PrometheusErr(format!("failed to set global recorder: {e}")))?;

    PROMETHEUS_HANDLE
        .set(handle)
        .map_err(|_| MetricsError::PrometheusErr("metrics recorder already initialized".into()))?;

    Ok(())
}

/// Renders everything recorded so far in Prometheus text format.
pub fn render_metrics() -> String {
    PROMETHEUS_HANDLE.get().map(|h| h.render()).unwrap_or_default()
}

pub fn is_initialized() -> bool {
    PROMETHEUS_HANDLE.get().is_some()
}
