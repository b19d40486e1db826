//! Ledger-posting and balance-read counters.

use metrics::{counter, histogram};

pub fn record_transaction_posted(transaction_type: &str) {
    counter!(
        "funding_ledger_transactions_posted_total",
        "transaction_type" => transaction_type.to_string(),
    )
    .increment(1);
}

pub fn record_balance_cache_hit() {
    counter!("funding_ledger_balance_cache_hits_total").increment(1);
}

pub fn record_balance_cache_miss() {
    counter!("funding_ledger_balance_cache_misses_total").increment(1);
}

pub fn record_split_residue_cents(cents: f64) {
    histogram!("funding_ledger_split_residue_cents").record(cents);
}
