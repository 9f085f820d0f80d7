//! Metrics collection.
//!
//! # Metrics
//! - `provider_requests_total` (counter): provider requests by method, outcome
//! - `session_epoch_advances_total` (counter): account-set changes applied
//! - `session_stale_results_total` (counter): responses discarded as stale
//! - `encryption_failures_total` (counter): workflow failures by stage
//!
//! Updates go through the `metrics` facade; they are no-ops until the host
//! installs a recorder.

pub fn record_provider_request(method: &'static str, outcome: &'static str) {
    ::metrics::counter!("provider_requests_total", "method" => method, "outcome" => outcome)
        .increment(1);
}

pub fn record_epoch_advance() {
    ::metrics::counter!("session_epoch_advances_total").increment(1);
}

pub fn record_stale_result(method: &'static str) {
    ::metrics::counter!("session_stale_results_total", "method" => method).increment(1);
}

pub fn record_workflow_failure(stage: &'static str) {
    ::metrics::counter!("encryption_failures_total", "stage" => stage).increment(1);
}
