//! Telemetry configuration from environment variables.

use std::env;

/// Logging configuration shared by the listener and its workers.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to every event
    pub service_name: String,

    /// Log filter directive (trace, debug, info, warn, error or a full `EnvFilter` string)
    pub log_level: String,

    /// Whether to emit JSON formatted logs
    pub json_logs: bool,

    /// Whether to print the event target
    pub with_target: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "handoffd".to_string(),
            log_level: "info".to_string(),
            json_logs: false,
            with_target: true,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `HANDOFF_SERVICE_NAME`: Service name (default: handoffd)
    /// - `HANDOFF_LOG_LEVEL` or `RUST_LOG`: Log filter (default: info)
    /// - `HANDOFF_JSON_LOGS`: Enable JSON logs (default: false, true in containers)
    pub fn from_env() -> Self {
        let is_container =
            env::var("KUBERNETES_SERVICE_HOST").is_ok() || env::var("DOCKER_CONTAINER").is_ok();

        Self {
            service_name: env::var("HANDOFF_SERVICE_NAME")
                .unwrap_or_else(|_| "handoffd".to_string()),

            log_level: env::var("HANDOFF_LOG_LEVEL")
                .or_else(|_| env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string()),

            json_logs: env::var("HANDOFF_JSON_LOGS")
                .map(|v| parse_flag(&v))
                .unwrap_or(is_container),

            with_target: true,
        }
    }

    /// Same configuration with `debug` logging forced on.
    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        if debug {
            self.log_level = "debug".to_string();
        }
        self
    }

    /// Configuration for a worker process: same sink, distinct service name.
    #[must_use]
    pub fn for_worker(mut self) -> Self {
        self.service_name = format!("{}-worker", self.service_name);
        self
    }
}

fn parse_flag(value: &str) -> bool {
    value.eq_ignore_ascii_case("true") || value == "1"
}
