//! Metrics instrumentation for runtime observability.

use std::time::Instant;

/// Record provider call latency.
pub fn record_llm_latency(duration_ms: f64) {
    metrics::histogram!("llm_request_latency", duration_ms);
}

/// Record a whole turn, from admission to reply.
pub fn record_turn_duration(duration_ms: f64) {
    metrics::histogram!("turn_duration", duration_ms);
}

/// Record time spent waiting for a session's turn lock.
pub fn record_lock_wait(duration_ms: f64) {
    metrics::histogram!("lock_wait_duration", duration_ms);
}

pub fn increment_failover(from: &str) {
    metrics::counter!("provider_failover_count", 1, "from" => from.to_string());
}

/// Count turns that ended without a normal reply.
pub fn increment_aborted_turn(reason: &'static str) {
    metrics::counter!("aborted_turn_count", 1, "reason" => reason);
}

/// RAII timer for automatic metric recording.
pub struct MetricTimer {
    start: Instant,
    metric_name: &'static str,
}

impl MetricTimer {
    pub fn new(metric_name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            metric_name,
        }
    }
}

impl Drop for MetricTimer {
    fn drop(&mut self) {
        let duration_ms = self.start.elapsed().as_secs_f64() * 1000.0;
        match self.metric_name {
            "llm_request_latency" => record_llm_latency(duration_ms),
            "turn_duration" => record_turn_duration(duration_ms),
            "lock_wait_duration" => record_lock_wait(duration_ms),
            _ => {}
        }
    }
}
