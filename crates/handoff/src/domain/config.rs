//! Handoff configuration and validation
//!
//! # Example
//!
//! ```ignore
//! use handoff::domain::HandoffConfig;
//!
//! let config = HandoffConfig {
//!     connect_timeout_ms: 2_000,
//!     ..HandoffConfig::default()
//! };
//! config.validate()?;
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::token::DuplicationStrategy;
use crate::error::HandoffError;

/// Strategy requested by configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyChoice {
    /// Platform default.
    #[default]
    Auto,
    Inherited,
    Explicit,
}

impl StrategyChoice {
    /// Concrete strategy requested, `None` for the platform default.
    pub fn requested(self) -> Option<DuplicationStrategy> {
        match self {
            Self::Auto => None,
            Self::Inherited => Some(DuplicationStrategy::Inherited),
            Self::Explicit => Some(DuplicationStrategy::Explicit),
        }
    }
}

impl std::str::FromStr for StrategyChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("auto") {
            return Ok(Self::Auto);
        }
        match s.parse::<DuplicationStrategy>()? {
            DuplicationStrategy::Inherited => Ok(Self::Inherited),
            DuplicationStrategy::Explicit => Ok(Self::Explicit),
        }
    }
}

/// Parameters of the parent-side handoff protocol.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandoffConfig {
    /// Prefix of generated channel names
    pub channel_base_name: String,
    /// Directory holding Unix channel socket files
    pub channel_dir: PathBuf,
    /// How long the parent waits for the worker to connect
    pub connect_timeout_ms: u64,
    /// How long a frame write or read may take
    pub transfer_timeout_ms: u64,
    /// Interval between worker liveness polls
    pub registry_poll_interval_ms: u64,
    /// Duplication strategy
    pub strategy: StrategyChoice,
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self {
            channel_base_name: "handoff".to_string(),
            channel_dir: std::env::temp_dir(),
            connect_timeout_ms: 5_000,
            transfer_timeout_ms: 5_000,
            registry_poll_interval_ms: 50,
            strategy: StrategyChoice::Auto,
        }
    }
}

impl HandoffConfig {
    /// Reject values the protocol cannot run with.
    pub fn validate(&self) -> Result<(), HandoffError> {
        if self.channel_base_name.trim().is_empty() {
            return Err(HandoffError::Config(
                "channel_base_name must not be empty".into(),
            ));
        }
        if self.connect_timeout_ms == 0 {
            return Err(HandoffError::Config("connect_timeout_ms must be > 0".into()));
        }
        if self.transfer_timeout_ms == 0 {
            return Err(HandoffError::Config("transfer_timeout_ms must be > 0".into()));
        }
        if self.registry_poll_interval_ms == 0 {
            return Err(HandoffError::Config(
                "registry_poll_interval_ms must be > 0".into(),
            ));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_millis(self.transfer_timeout_ms)
    }

    pub fn registry_poll_interval(&self) -> Duration {
        Duration::from_millis(self.registry_poll_interval_ms)
    }
}
