//! Port implementations wired into the core crate.

pub mod metrics;

pub use metrics::PrometheusMetrics;
