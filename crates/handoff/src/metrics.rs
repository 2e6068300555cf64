//! Metrics hooks for handoff operations
//!
//! The orchestrator and registry report through [`MetricsRecorder`]; the
//! runtime plugs in a Prometheus-backed implementation, tests use [`Metrics`].
//!
//! ## Usage
//!
//! ```ignore
//! use handoff::metrics::{Metrics, MetricsRecorder};
//!
//! let metrics = Metrics::new();
//! metrics.record_handoff_completed(started.elapsed());
//! assert_eq!(metrics.snapshot().handoffs_completed, 1);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Trait for metrics recording implementations.
pub trait MetricsRecorder: Send + Sync {
    /// A connection was handed to a worker.
    fn record_handoff_completed(&self, duration: Duration);

    /// A handoff attempt failed; `kind` is `HandoffError::kind()`.
    fn record_handoff_failed(&self, kind: &'static str);

    /// A worker was added to the registry.
    fn record_worker_registered(&self);

    /// A registered worker was reaped.
    fn record_worker_exited(&self, exit_code: i32);
}

/// No-op metrics recorder for when metrics are disabled
#[derive(Default)]
pub struct NoOpMetrics;

impl MetricsRecorder for NoOpMetrics {
    fn record_handoff_completed(&self, _: Duration) {}
    fn record_handoff_failed(&self, _: &'static str) {}
    fn record_worker_registered(&self) {}
    fn record_worker_exited(&self, _: i32) {}
}

/// In-process counters
#[derive(Default)]
pub struct Metrics {
    pub handoffs_completed: AtomicU64,
    pub handoffs_failed: AtomicU64,
    pub channel_timeouts: AtomicU64,
    pub workers_registered: AtomicU64,
    pub workers_exited: AtomicU64,
    pub workers_failed: AtomicU64,
    /// Cumulative handoff time in nanoseconds
    pub handoff_time_ns: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        let registered = self.workers_registered.load(Ordering::Relaxed);
        let exited = self.workers_exited.load(Ordering::Relaxed);
        MetricsSnapshot {
            handoffs_completed: self.handoffs_completed.load(Ordering::Relaxed),
            handoffs_failed: self.handoffs_failed.load(Ordering::Relaxed),
            channel_timeouts: self.channel_timeouts.load(Ordering::Relaxed),
            workers_registered: registered,
            workers_exited: exited,
            workers_failed: self.workers_failed.load(Ordering::Relaxed),
            workers_live: registered.saturating_sub(exited),
            avg_handoff_ns: self.avg_handoff_time_ns(),
        }
    }

    /// Average handoff time in nanoseconds
    pub fn avg_handoff_time_ns(&self) -> u64 {
        let total = self.handoff_time_ns.load(Ordering::Relaxed);
        let count = self.handoffs_completed.load(Ordering::Relaxed);
        if count > 0 {
            total / count
        } else {
            0
        }
    }
}

impl MetricsRecorder for Metrics {
    fn record_handoff_completed(&self, duration: Duration) {
        self.handoffs_completed.fetch_add(1, Ordering::Relaxed);
        self.handoff_time_ns
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
    }

    fn record_handoff_failed(&self, kind: &'static str) {
        self.handoffs_failed.fetch_add(1, Ordering::Relaxed);
        if kind == "channel_timeout" {
            self.channel_timeouts.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn record_worker_registered(&self) {
        self.workers_registered.fetch_add(1, Ordering::Relaxed);
    }

    fn record_worker_exited(&self, exit_code: i32) {
        self.workers_exited.fetch_add(1, Ordering::Relaxed);
        if exit_code != 0 {
            self.workers_failed.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Point-in-time metrics snapshot
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub handoffs_completed: u64,
    pub handoffs_failed: u64,
    pub channel_timeouts: u64,
    pub workers_registered: u64,
    pub workers_exited: u64,
    pub workers_failed: u64,
    pub workers_live: u64,
    pub avg_handoff_ns: u64,
}
