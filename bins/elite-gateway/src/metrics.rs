// Prometheus metrics for the gateway

use elite_common::types::ErrorKind;
use lazy_static::lazy_static;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::time::Duration;
use tracing::error;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    pub static ref SUBMISSIONS_RECEIVED: IntCounter = register(
        IntCounter::new("elite_submissions_received_total", "Submission messages received")
            .expect("valid metric definition"),
    );

    pub static ref SUBMISSIONS_REJECTED: IntCounterVec = register(
        IntCounterVec::new(
            Opts::new("elite_submissions_rejected_total", "Submissions rejected before queueing"),
            &["kind"],
        )
        .expect("valid metric definition"),
    );

    pub static ref ROUND_TRIP_FAILURES: IntCounterVec = register(
        IntCounterVec::new(
            Opts::new("elite_round_trip_failures_total", "Queued jobs that produced no result"),
            &["kind"],
        )
        .expect("valid metric definition"),
    );

    pub static ref ROUND_TRIP_SECONDS: Histogram = register(
        Histogram::with_opts(
            HistogramOpts::new("elite_round_trip_seconds", "Time from queueing a job to its result")
                .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0]),
        )
        .expect("valid metric definition"),
    );
}

fn register<M>(metric: M) -> M
where
    M: prometheus::core::Collector + Clone + 'static,
{
    if let Err(e) = REGISTRY.register(Box::new(metric.clone())) {
        error!(error = %e, "Failed to register metric");
    }
    metric
}

pub fn record_received() {
    SUBMISSIONS_RECEIVED.inc();
}

pub fn record_rejected(kind: ErrorKind) {
    SUBMISSIONS_REJECTED.with_label_values(&[kind.as_str()]).inc();
}

pub fn record_round_trip(elapsed: Duration) {
    ROUND_TRIP_SECONDS.observe(elapsed.as_secs_f64());
}

pub fn record_failure(kind: ErrorKind) {
    ROUND_TRIP_FAILURES.with_label_values(&[kind.as_str()]).inc();
}

/// Prometheus text exposition of every gateway metric
pub fn render() -> String {
    // Touch the lazies so a fresh process still lists every family
    lazy_static::initialize(&SUBMISSIONS_RECEIVED);
    lazy_static::initialize(&SUBMISSIONS_REJECTED);
    lazy_static::initialize(&ROUND_TRIP_FAILURES);
    lazy_static::initialize(&ROUND_TRIP_SECONDS);

    let mut buffer = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_lists_counters() {
        record_received();
        record_rejected(ErrorKind::Validation);
        record_failure(ErrorKind::BrokerTimeout);
        record_round_trip(Duration::from_millis(120));

        let text = render();
        assert!(text.contains("elite_submissions_received_total"));
        assert!(text.contains("elite_submissions_rejected_total{kind=\"validation\"}"));
        assert!(text.contains("elite_round_trip_failures_total{kind=\"broker-timeout\"}"));
        assert!(text.contains("elite_round_trip_seconds_bucket"));
    }
}
