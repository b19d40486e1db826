//! Reconciliation-tick counters.

use metrics::{counter, gauge};

pub fn record_tick(recovered: u64, failed: u64, skipped: u64) {
    counter!("funding_reconciliation_recovered_total").increment(recovered);
    counter!("funding_reconciliation_failed_total").increment(failed);
    counter!("funding_reconciliation_skipped_total").increment(skipped);
}

pub fn record_candidate_queue_depth(depth: u64) {
    gauge!("funding_reconciliation_candidate_queue_depth").set(depth as f64);
}
