//! Structured logging setup.
//!
//! One `tracing-subscriber` registry per process: an `EnvFilter` built from
//! the configured directive plus either a human readable or a JSON fmt layer.
//! JSON events carry `timestamp`, `level`, `target`, `fields` and the current
//! span list, which is what log shippers expect.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{TelemetryConfig, TelemetryError};

/// Build the filter for `config`.
pub fn env_filter(config: &TelemetryConfig) -> Result<EnvFilter, TelemetryError> {
    EnvFilter::try_new(&config.log_level).map_err(|e| TelemetryError::Filter(e.to_string()))
}

/// Install the global subscriber.
///
/// Fails with [`TelemetryError::AlreadyInitialized`] when another subscriber
/// was installed first.
pub fn init_logging(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let filter = env_filter(config)?;

    if config.json_logs {
        let json_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(config.with_target)
            .with_thread_ids(true)
            .with_current_span(true)
            .with_span_list(true);

        tracing_subscriber::registry()
            .with(filter)
            .with(json_layer)
            .try_init()
            .map_err(|e| TelemetryError::AlreadyInitialized(e.to_string()))?;
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(config.with_target)
            .with_thread_ids(false)
            .with_ansi(true);

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init()
            .map_err(|e| TelemetryError::AlreadyInitialized(e.to_string()))?;
    }

    tracing::debug!(
        service = %config.service_name,
        json_logs = config.json_logs,
        filter = %config.log_level,
        "logging initialized"
    );
    Ok(())
}

/// Emit an event tagged with the emitting component.
///
/// ```rust,ignore
/// log_event!(info, "supervisor", "worker exited", worker_pid = pid, exit_code = code);
/// ```
#[macro_export]
macro_rules! log_event {
    ($level:ident, $component:expr, $msg:expr $(, $($field:tt)*)?) => {
        tracing::$level!(
            component = $component,
            $($($field)*,)?
            $msg
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_filter_accepts_directives() {
        let config = TelemetryConfig {
            log_level: "handoff=debug,info".to_string(),
            ..TelemetryConfig::default()
        };
        assert!(env_filter(&config).is_ok());
    }

    #[test]
    fn test_env_filter_rejects_garbage() {
        let config = TelemetryConfig {
            log_level: "handoff=loud".to_string(),
            ..TelemetryConfig::default()
        };
        assert!(matches!(env_filter(&config), Err(TelemetryError::Filter(_))));
    }

    #[test]
    fn test_log_event_compiles_with_and_without_fields() {
        crate::log_event!(info, "test", "plain event");
        crate::log_event!(warn, "test", "event with fields", worker_pid = 7u32, reason = "x");
    }
}
