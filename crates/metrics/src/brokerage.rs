//! Brokerage-bridge counters: instant funding and basket order fan-out.

use metrics::counter;

pub fn record_funding_attempt(outcome: &str) {
    counter!("funding_brokerage_funding_attempts_total", "outcome" => outcome.to_string()).increment(1);
}

pub fn record_basket_order_submitted(symbol: &str) {
    counter!("funding_brokerage_basket_orders_submitted_total", "symbol" => symbol.to_string()).increment(1);
}

pub fn record_basket_component_skipped_as_dust(symbol: &str) {
    counter!("funding_brokerage_basket_components_skipped_total", "symbol" => symbol.to_string()).increment(1);
}

pub fn record_basket_cancel(outcome: &str) {
    counter!("funding_brokerage_basket_cancels_total", "outcome" => outcome.to_string()).increment(1);
}
