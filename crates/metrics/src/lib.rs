//! Prometheus metrics for the funding core, built on the `metrics` facade
//! crate plus `metrics-exporter-prometheus`'s recorder: every component
//! records through plain function calls here rather than reaching for the
//! `metrics` macros directly, keeping label names and cardinality
//! centralized in one crate.

pub mod brokerage;
pub mod error;
pub mod jobs;
pub mod ledger;
pub mod reconciliation;
pub mod recorder;

#[cfg(feature = "api")]
pub mod api;

pub use error::MetricsError;
pub use recorder::{initialize_recorder, is_initialized, render_metrics};

#[cfg(feature = "api")]
pub use api::start_metrics_server;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_empty_before_any_recording() {
        // A fresh process with no recorder installed renders the empty
        // string rather than panicking.
        assert_eq!(render_metrics(), String::new());
    }

    #[test]
    fn jobs_and_ledger_helpers_do_not_panic_without_a_recorder() {
        jobs::record_job_enqueued("ethereum");
        jobs::record_job_succeeded("ethereum");
        jobs::record_job_retried("ethereum", "transient");
        jobs::record_job_dlq("ethereum");
        jobs::record_circuit_breaker_trip("worker-0");
        ledger::record_transaction_posted("deposit");
        ledger::record_balance_cache_hit();
        reconciliation::record_tick(1, 0, 2);
        brokerage::record_funding_attempt("accepted");
    }
}
