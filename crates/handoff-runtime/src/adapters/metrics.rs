//! Prometheus-backed `MetricsRecorder`.

use std::time::Duration;

use handoff::MetricsRecorder;
use handoff_telemetry::{
    exit_status_label, HANDOFFS_TOTAL, HANDOFF_DURATION_SECONDS, WORKERS_LIVE, WORKER_EXITS_TOTAL,
};

/// Reports handoff and worker events to the global Prometheus registry.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrometheusMetrics;

impl MetricsRecorder for PrometheusMetrics {
    fn record_handoff_completed(&self, duration: Duration) {
        HANDOFFS_TOTAL.with_label_values(&["completed"]).inc();
        HANDOFF_DURATION_SECONDS.observe(duration.as_secs_f64());
    }

    fn record_handoff_failed(&self, kind: &'static str) {
        HANDOFFS_TOTAL.with_label_values(&[kind]).inc();
    }

    fn record_worker_registered(&self) {
        WORKERS_LIVE.inc();
    }

    fn record_worker_exited(&self, exit_code: i32) {
        WORKERS_LIVE.dec();
        WORKER_EXITS_TOTAL
            .with_label_values(&[exit_status_label(exit_code)])
            .inc();
    }
}
