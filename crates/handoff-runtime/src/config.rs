//! # Runtime Configuration
//!
//! Layered: defaults, then an optional TOML file, then environment variables,
//! then command line flags.
//!
//! ```toml
//! [listener]
//! port = 8080
//! backlog = 30
//! bind_address = "0.0.0.0"
//! accept_deadline_ms = 1000
//!
//! [worker]
//! command = ["/usr/local/bin/handoffd", "worker"]
//!
//! [handoff]
//! channel_base_name = "handoff"
//! connect_timeout_ms = 5000
//! strategy = "auto"
//!
//! [serve]
//! read_timeout_ms = 5000
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use handoff::{HandoffConfig, StrategyChoice, WorkerCommand, DEFAULT_BACKLOG, DEFAULT_BIND_ADDRESS};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment override for the listening port.
pub const PORT_ENV: &str = "HANDOFF_PORT";
/// Environment override for the bind address.
pub const BIND_ADDRESS_ENV: &str = "HANDOFF_BIND_ADDRESS";
/// Environment override for the duplication strategy.
pub const STRATEGY_ENV: &str = "HANDOFF_STRATEGY";

/// Complete runtime configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub listener: ListenerConfig,
    pub worker: WorkerConfig,
    pub handoff: HandoffConfig,
    pub serve: ServeConfig,
}

/// Listening socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    pub port: u16,
    pub backlog: u32,
    pub bind_address: String,
    /// Bound on a single accept wait; shutdown is observed between waits.
    pub accept_deadline_ms: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            backlog: DEFAULT_BACKLOG,
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            accept_deadline_ms: 1_000,
        }
    }
}

/// Worker process image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Program and arguments. Empty means this executable's `worker` command.
    pub command: Vec<String>,
}

/// Connection serving inside a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServeConfig {
    pub read_timeout_ms: u64,
    pub max_read: usize,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: 5_000,
            max_read: 64 * 1024,
        }
    }
}

impl ServeConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// Errors that can occur during config loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {error}")]
    Io { path: String, error: String },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid value for {key}: {value}")]
    InvalidEnv { key: &'static str, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl RuntimeConfig {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            error: e.to_string(),
        })?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Apply `HANDOFF_PORT`, `HANDOFF_BIND_ADDRESS` and `HANDOFF_STRATEGY`.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`, keyed by environment variable name.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup(PORT_ENV) {
            self.listener.port = port.parse().map_err(|_| ConfigError::InvalidEnv {
                key: PORT_ENV,
                value: port,
            })?;
        }
        if let Some(address) = lookup(BIND_ADDRESS_ENV) {
            self.listener.bind_address = address;
        }
        if let Some(strategy) = lookup(STRATEGY_ENV) {
            self.handoff.strategy =
                strategy
                    .parse::<StrategyChoice>()
                    .map_err(|_| ConfigError::InvalidEnv {
                        key: STRATEGY_ENV,
                        value: strategy,
                    })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.handoff
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if self.listener.backlog == 0 {
            return Err(ConfigError::Invalid("listener.backlog must be positive".into()));
        }
        if self.listener.accept_deadline_ms == 0 {
            return Err(ConfigError::Invalid(
                "listener.accept_deadline_ms must be positive".into(),
            ));
        }
        if self.serve.read_timeout_ms == 0 || self.serve.max_read == 0 {
            return Err(ConfigError::Invalid(
                "serve.read_timeout_ms and serve.max_read must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn accept_deadline(&self) -> Duration {
        Duration::from_millis(self.listener.accept_deadline_ms)
    }

    /// The command each worker runs.
    ///
    /// Without a configured command this executable is re-run with `worker`,
    /// forwarding the serve settings.
    pub fn worker_command(&self) -> Result<WorkerCommand, ConfigError> {
        if let Some(command) = WorkerCommand::from_argv(&self.worker.command) {
            return Ok(command);
        }
        let exe = std::env::current_exe().map_err(|e| ConfigError::Io {
            path: "current executable".into(),
            error: e.to_string(),
        })?;
        Ok(WorkerCommand::new(
            exe.display().to_string(),
            vec![
                "worker".into(),
                "--read-timeout-ms".into(),
                self.serve.read_timeout_ms.to_string(),
                "--max-read".into(),
                self.serve.max_read.to_string(),
            ],
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.listener.port, 8080);
        assert_eq!(config.listener.backlog, 30);
        assert_eq!(config.listener.bind_address, "0.0.0.0");
        assert_eq!(config.serve.read_timeout_ms, 5_000);
        assert_eq!(config.handoff.connect_timeout_ms, 5_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_file_keeps_defaults() {
        let config = RuntimeConfig::parse(
            r#"
            [listener]
            port = 9000

            [handoff]
            strategy = "explicit"
            connect_timeout_ms = 250
            "#,
        )
        .unwrap();

        assert_eq!(config.listener.port, 9000);
        assert_eq!(config.listener.backlog, 30);
        assert_eq!(config.handoff.strategy, StrategyChoice::Explicit);
        assert_eq!(config.handoff.connect_timeout_ms, 250);
        assert_eq!(config.handoff.transfer_timeout_ms, 5_000);
    }

    #[test]
    fn test_parse_rejects_bad_toml() {
        assert!(matches!(
            RuntimeConfig::parse("[listener\nport = 1"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = RuntimeConfig::load(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("handoffd.toml");
        fs::write(&path, "[worker]\ncommand = [\"/bin/worker\", \"-v\"]\n").unwrap();

        let config = RuntimeConfig::load(&path).unwrap();
        let command = config.worker_command().unwrap();
        assert_eq!(command.program, "/bin/worker");
        assert_eq!(command.args, vec!["-v".to_string()]);
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            (PORT_ENV, "7000"),
            (BIND_ADDRESS_ENV, "127.0.0.1"),
            (STRATEGY_ENV, "inherit"),
        ]
        .into_iter()
        .collect();

        let mut config = RuntimeConfig::default();
        config
            .apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.listener.port, 7000);
        assert_eq!(config.listener.bind_address, "127.0.0.1");
        assert_eq!(config.handoff.strategy, StrategyChoice::Inherited);
    }

    #[test]
    fn test_invalid_port_override() {
        let mut config = RuntimeConfig::default();
        let err = config
            .apply_overrides(|k| (k == PORT_ENV).then(|| "eighty".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { key: PORT_ENV, .. }));
    }

    #[test]
    fn test_validate_rejects_zero_backlog() {
        let mut config = RuntimeConfig::default();
        config.listener.backlog = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_default_worker_command_reruns_this_executable() {
        let command = RuntimeConfig::default().worker_command().unwrap();
        assert_eq!(command.args[0], "worker");
        assert!(command.args.contains(&"5000".to_string()));
    }
}
