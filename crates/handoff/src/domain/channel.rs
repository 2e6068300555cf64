//! # Handoff Channel Naming and State
//!
//! Channels are named `{base}-{pid}-{counter}` so concurrent handoffs in one
//! listener, and listeners in different processes, never share an endpoint.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::HandoffError;

/// Validated name of a handoff channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelName(String);

impl ChannelName {
    /// Validate and wrap a channel name.
    ///
    /// Names must be non-empty and must not contain path separators, since
    /// they become a file name (Unix) or a pipe name (Windows).
    pub fn new(name: impl Into<String>) -> Result<Self, HandoffError> {
        let name = name.into();
        if name.is_empty() {
            return Err(HandoffError::Config("channel name must not be empty".into()));
        }
        if name.contains(['/', '\\']) || name.contains('\0') {
            return Err(HandoffError::Config(format!(
                "channel name `{name}` must not contain path separators"
            )));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Generates unique channel names for one listening process.
#[derive(Debug)]
pub struct ChannelNamer {
    prefix: String,
    counter: AtomicU64,
}

impl ChannelNamer {
    /// Namer for the current process.
    pub fn new(base: &str) -> Result<Self, HandoffError> {
        Self::with_pid(base, std::process::id())
    }

    /// Namer using an explicit pid component.
    pub fn with_pid(base: &str, pid: u32) -> Result<Self, HandoffError> {
        // Validates the base as a name fragment.
        ChannelName::new(base)?;
        Ok(Self {
            prefix: format!("{base}-{pid}"),
            counter: AtomicU64::new(1),
        })
    }

    /// Next unique name.
    pub fn next_name(&self) -> ChannelName {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        ChannelName(format!("{}-{}", self.prefix, n))
    }
}

/// Lifecycle of a handoff channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelState {
    Created,
    AwaitingPeer,
    Connected,
    Closed,
    Failed,
}

impl ChannelState {
    /// Whether the channel may move from `self` to `next`.
    pub fn can_transition_to(self, next: ChannelState) -> bool {
        use ChannelState::*;
        matches!(
            (self, next),
            (Created, AwaitingPeer)
                | (Created, Failed)
                | (Created, Closed)
                | (AwaitingPeer, Connected)
                | (AwaitingPeer, Failed)
                | (AwaitingPeer, Closed)
                | (Connected, Failed)
                | (Connected, Closed)
                | (Failed, Closed)
        )
    }

    /// Whether no further transfer can happen on the channel.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::AwaitingPeer => "awaiting-peer",
            Self::Connected => "connected",
            Self::Closed => "closed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_channel_name_rejects_separators() {
        assert!(ChannelName::new("h-1").is_ok());
        assert!(ChannelName::new("").is_err());
        assert!(ChannelName::new("a/b").is_err());
        assert!(ChannelName::new(r"a\b").is_err());
    }

    #[test]
    fn test_namer_produces_distinct_names() {
        let namer = ChannelNamer::with_pid("h", 7).unwrap();
        assert_eq!(namer.next_name().as_str(), "h-7-1");
        assert_eq!(namer.next_name().as_str(), "h-7-2");

        let names: HashSet<_> = (0..50).map(|_| namer.next_name()).collect();
        assert_eq!(names.len(), 50);
    }

    #[test]
    fn test_namer_is_unique_across_threads() {
        let namer = std::sync::Arc::new(ChannelNamer::new("handoff").unwrap());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let namer = namer.clone();
                std::thread::spawn(move || (0..100).map(|_| namer.next_name()).collect::<Vec<_>>())
            })
            .collect();

        let mut all = HashSet::new();
        for h in handles {
            for name in h.join().unwrap() {
                assert!(all.insert(name));
            }
        }
        assert_eq!(all.len(), 800);
    }

    #[test]
    fn test_state_transitions() {
        use ChannelState::*;
        assert!(Created.can_transition_to(AwaitingPeer));
        assert!(AwaitingPeer.can_transition_to(Connected));
        assert!(AwaitingPeer.can_transition_to(Failed));
        assert!(Connected.can_transition_to(Closed));
        assert!(Failed.can_transition_to(Closed));

        assert!(!Closed.can_transition_to(AwaitingPeer));
        assert!(!Failed.can_transition_to(Connected));
        assert!(!Connected.can_transition_to(AwaitingPeer));
        assert!(Closed.is_terminal());
        assert!(!Connected.is_terminal());
    }
}
