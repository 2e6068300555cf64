//! # Handoff Telemetry
//!
//! Logging and metrics for the handoff listener and its workers.
//!
//! ## Components
//!
//! - **Logging**: `tracing-subscriber` with an `EnvFilter`, human readable or JSON
//! - **Metrics**: Prometheus counters, gauge and histogram in a global registry
//!
//! ## Usage
//!
//! ```rust,ignore
//! use handoff_telemetry::{init_telemetry, TelemetryConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     init_telemetry(&TelemetryConfig::from_env())?;
//!     // ...
//!     Ok(())
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `HANDOFF_SERVICE_NAME` | `handoffd` | Service name in logs |
//! | `HANDOFF_LOG_LEVEL` | `info` | Log filter, falls back to `RUST_LOG` |
//! | `HANDOFF_JSON_LOGS` | `false` | JSON output (`true` inside containers) |

mod config;
mod logging;
mod metrics;

pub use config::TelemetryConfig;
pub use logging::{env_filter, init_logging};
pub use metrics::{
    exit_status_label, gather_text, register_metrics, HANDOFFS_TOTAL, HANDOFF_DURATION_SECONDS,
    REGISTRY, WORKERS_LIVE, WORKER_EXITS_TOTAL,
};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("invalid log filter: {0}")]
    Filter(String),

    #[error("a global subscriber is already installed: {0}")]
    AlreadyInitialized(String),

    #[error("failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),
}

/// Register metrics, then install logging.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    register_metrics()?;
    init_logging(config)
}

/// Span for one handoff-related operation.
///
/// ```rust,ignore
/// let _span = handoff_span!("handoff", peer = %peer).entered();
/// ```
#[macro_export]
macro_rules! handoff_span {
    ($name:expr) => {
        tracing::info_span!($name)
    };
    ($name:expr, $($field:tt)*) => {
        tracing::info_span!($name, $($field)*)
    };
}
