//! Pipeline metrics
//!
//! Prometheus counters and histograms for stage latency, degradations and
//! guardrail decisions. The exporter itself is installed by the server.

use metrics::{counter, histogram};

/// Record one stage execution.
pub fn record_stage(stage: &'static str, elapsed_ms: u64, count: usize, degraded: bool) {
    histogram!("ragline_stage_duration_ms", "stage" => stage).record(elapsed_ms as f64);
    histogram!("ragline_stage_result_count", "stage" => stage).record(count as f64);
    if degraded {
        counter!("ragline_stage_degraded_total", "stage" => stage).increment(1);
    }
}

/// Record the guardrail decision for a request.
pub fn record_decision(decision: &'static str, reason: Option<&'static str>) {
    counter!(
        "ragline_guardrail_decisions_total",
        "decision" => decision,
        "reason" => reason.unwrap_or("none")
    )
    .increment(1);
}

/// Record a degradation alert from the confidence model.
pub fn record_degradation_alert(stage: &'static str) {
    counter!("ragline_degradation_alerts_total", "stage" => stage).increment(1);
}

/// Record whole-request latency and outcome.
pub fn record_request(outcome: &'static str, elapsed_ms: u64) {
    counter!("ragline_requests_total", "outcome" => outcome).increment(1);
    histogram!("ragline_request_duration_ms", "outcome" => outcome).record(elapsed_ms as f64);
}
