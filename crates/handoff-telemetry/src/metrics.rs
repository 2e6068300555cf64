//! Prometheus metrics for the handoff listener.
//!
//! All metrics follow the naming convention: `handoff_<metric>_<unit>`
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `handoff_handoffs_total` | Counter | `outcome`: `completed` or an error kind |
//! | `handoff_duration_seconds` | Histogram | |
//! | `handoff_workers_live` | Gauge | |
//! | `handoff_worker_exits_total` | Counter | `status`: `success` / `failure` |

use lazy_static::lazy_static;
use prometheus::{
    exponential_buckets, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry,
    TextEncoder,
};

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    /// Handoff attempts by outcome
    pub static ref HANDOFFS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("handoff_handoffs_total", "Handoff attempts by outcome"),
        &["outcome"]
    ).expect("metric creation failed");

    /// Time from accept to worker registration
    pub static ref HANDOFF_DURATION_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "handoff_duration_seconds",
            "Time spent handing a connection to a worker"
        ).buckets(exponential_buckets(0.0005, 2.0, 14).expect("valid buckets"))
    ).expect("metric creation failed");

    /// Registered workers not yet reaped
    pub static ref WORKERS_LIVE: Gauge = Gauge::new(
        "handoff_workers_live",
        "Number of registered workers that have not been reaped"
    ).expect("metric creation failed");

    /// Reaped workers by exit status
    pub static ref WORKER_EXITS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("handoff_worker_exits_total", "Reaped workers by exit status"),
        &["status"]
    ).expect("metric creation failed");
}

/// Register all metrics with the global registry. Safe to call repeatedly.
pub fn register_metrics() -> Result<(), TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(HANDOFFS_TOTAL.clone()),
        Box::new(HANDOFF_DURATION_SECONDS.clone()),
        Box::new(WORKERS_LIVE.clone()),
        Box::new(WORKER_EXITS_TOTAL.clone()),
    ];

    for metric in metrics {
        match REGISTRY.register(metric) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(TelemetryError::MetricsInit(e.to_string())),
        }
    }
    Ok(())
}

/// Label for a worker exit code.
pub fn exit_status_label(exit_code: i32) -> &'static str {
    if exit_code == 0 {
        "success"
    } else {
        "failure"
    }
}

/// Encode all metrics as Prometheus text format.
pub fn gather_text() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_metrics_is_idempotent() {
        register_metrics().unwrap();
        register_metrics().unwrap();
    }

    #[test]
    fn test_counter_increment() {
        let before = HANDOFFS_TOTAL.with_label_values(&["completed"]).get();
        HANDOFFS_TOTAL.with_label_values(&["completed"]).inc();
        assert!(HANDOFFS_TOTAL.with_label_values(&["completed"]).get() >= before + 1.0);
    }

    #[test]
    fn test_exit_status_label() {
        assert_eq!(exit_status_label(0), "success");
        assert_eq!(exit_status_label(137), "failure");
        assert_eq!(exit_status_label(-1), "failure");
    }

    #[test]
    fn test_gather_text_contains_registered_metric() {
        register_metrics().unwrap();
        HANDOFF_DURATION_SECONDS.observe(0.002);
        let text = gather_text().unwrap();
        assert!(text.contains("handoff_duration_seconds"));
    }
}
