//! Error types for the handoff subsystem
//!
//! Every failure of a single handoff attempt surfaces as exactly one
//! [`HandoffError`]. Registry misuse is reported separately through
//! [`RegistryError`] and never affects an in-flight handoff.

use std::io;

use thiserror::Error;

use crate::domain::{ChannelName, ChannelState, TokenId};

/// Errors raised while binding, accepting, or handing off a connection.
#[derive(Debug, Error)]
pub enum HandoffError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("accept failed: {source}")]
    Accept {
        #[source]
        source: io::Error,
        /// Unrecoverable socket error; the accept loop must stop.
        fatal: bool,
    },

    #[error("failed to spawn worker `{program}`: {reason}")]
    Spawn { program: String, reason: String },

    #[error("socket duplication for pid {pid} failed: {reason}")]
    Duplication { pid: u32, reason: String },

    #[error("worker did not connect to channel {channel} within {timeout_ms} ms")]
    ChannelTimeout { channel: ChannelName, timeout_ms: u64 },

    #[error("channel {channel}: {reason}")]
    Channel { channel: ChannelName, reason: String },

    #[error("channel {channel} cannot move from {from} to {to}")]
    InvalidChannelState {
        channel: ChannelName,
        from: ChannelState,
        to: ChannelState,
    },

    #[error("handoff transfer failed: {0}")]
    Transfer(String),

    #[error("reconstruction failed: {0}")]
    Reconstruction(#[from] ReconstructionError),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl HandoffError {
    /// Short stable label used in log fields and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Bind { .. } => "bind",
            Self::Accept { .. } => "accept",
            Self::Spawn { .. } => "spawn",
            Self::Duplication { .. } => "duplication",
            Self::ChannelTimeout { .. } => "channel_timeout",
            Self::Channel { .. } | Self::InvalidChannelState { .. } => "channel",
            Self::Transfer(_) => "transfer",
            Self::Reconstruction(_) => "reconstruction",
            Self::Config(_) => "config",
        }
    }

    /// Whether the owning process cannot continue accepting after this error.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Bind { .. } => true,
            Self::Accept { fatal, .. } => *fatal,
            _ => false,
        }
    }

    pub(crate) fn transfer(context: &str, err: impl std::fmt::Display) -> Self {
        Self::Transfer(format!("{context}: {err}"))
    }
}

/// Errors raised by the worker when materializing a received token.
#[derive(Debug, Error)]
pub enum ReconstructionError {
    #[error("token {token} is bound to pid {bound_pid}, not to this process (pid {current_pid})")]
    WrongProcess {
        token: TokenId,
        bound_pid: u32,
        current_pid: u32,
    },

    #[error("token {0} was already consumed")]
    AlreadyConsumed(TokenId),

    #[error("token uses the {token} strategy but this process reconstructs with {local}")]
    StrategyMismatch { token: String, local: String },

    #[error("raw handle value {0} is not a valid descriptor")]
    InvalidHandle(u64),

    #[error("descriptor {0} is not a socket")]
    NotASocket(u64),

    #[error("token carries no duplicated descriptor")]
    MissingDescriptor,

    #[error("OS reconstruction call failed: {0}")]
    Os(#[from] io::Error),
}

/// Errors raised by the worker registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no workers are registered")]
    NoWorkers,

    #[error("worker {0} is not registered")]
    NotFound(u32),

    #[error("failed to terminate worker {pid}: {source}")]
    Termination {
        pid: u32,
        #[source]
        source: io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_bind_and_fatal_accept_are_fatal() {
        let bind = HandoffError::Bind {
            address: "0.0.0.0:80".into(),
            source: io::Error::from(io::ErrorKind::AddrInUse),
        };
        assert!(bind.is_fatal());

        let transient = HandoffError::Accept {
            source: io::Error::from(io::ErrorKind::Other),
            fatal: false,
        };
        assert!(!transient.is_fatal());

        let timeout = HandoffError::ChannelTimeout {
            channel: ChannelName::new("h-1").unwrap(),
            timeout_ms: 5000,
        };
        assert!(!timeout.is_fatal());
        assert_eq!(timeout.kind(), "channel_timeout");
    }

    #[test]
    fn test_reconstruction_error_converts() {
        let err: HandoffError = ReconstructionError::MissingDescriptor.into();
        assert_eq!(err.kind(), "reconstruction");
    }
}
