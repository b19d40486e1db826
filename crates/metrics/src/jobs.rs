//! Webhook-processor and job-queue counters.

use metrics::{counter, histogram};

pub fn record_job_enqueued(chain: &str) {
    counter!("funding_jobs_enqueued_total", "chain" => chain.to_string()).increment(1);
}

pub fn record_job_succeeded(chain: &str) {
    counter!("funding_jobs_succeeded_total", "chain" => chain.to_string()).increment(1);
}

pub fn record_job_retried(chain: &str, error_type: &str) {
    counter!(
        "funding_jobs_retried_total",
        "chain" => chain.to_string(),
        "error_type" => error_type.to_string(),
    )
    .increment(1);
}

pub fn record_job_dlq(chain: &str) {
    counter!("funding_jobs_dlq_total", "chain" => chain.to_string()).increment(1);
}

pub fn record_job_processing_seconds(chain: &str, seconds: f64) {
    histogram!("funding_job_processing_seconds", "chain" => chain.to_string()).record(seconds);
}

pub fn record_circuit_breaker_trip(worker: &str) {
    counter!("funding_circuit_breaker_trips_total", "worker" => worker.to_string()).increment(1);
}

pub fn record_circuit_breaker_reset(worker: &str) {
    counter!("funding_circuit_breaker_resets_total", "worker" => worker.to_string()).increment(1);
}
