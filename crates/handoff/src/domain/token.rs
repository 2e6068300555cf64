//! # Duplication Tokens
//!
//! A token authorizes exactly one reconstruction of a connection inside one
//! target process. Tokens are move-only; the [`TokenLedger`] additionally
//! rejects a token id that was already consumed, which covers tokens decoded
//! twice from the same wire bytes.

use std::collections::HashSet;
use std::fmt;
use std::sync::OnceLock;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Size of the opaque payload carried by an explicit-duplication token.
#[cfg(windows)]
pub const EXPLICIT_PAYLOAD_LEN: usize =
    std::mem::size_of::<windows_sys::Win32::Networking::WinSock::WSAPROTOCOL_INFOW>();

/// Size of the opaque payload carried by an explicit-duplication token.
///
/// Zero on Unix: the duplicated descriptor travels as `SCM_RIGHTS`
/// ancillary data next to the frame.
#[cfg(not(windows))]
pub const EXPLICIT_PAYLOAD_LEN: usize = 0;

// =============================================================================
// STRATEGY
// =============================================================================

/// How a connection is made usable in another process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicationStrategy {
    /// The worker inherits the descriptor at process creation.
    Inherited,
    /// The descriptor is duplicated for a known target pid.
    Explicit,
}

impl DuplicationStrategy {
    /// Wire tag of this strategy.
    pub fn tag(self) -> u8 {
        match self {
            Self::Inherited => 1,
            Self::Explicit => 2,
        }
    }

    /// Strategy for a wire tag.
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::Inherited),
            2 => Some(Self::Explicit),
            _ => None,
        }
    }

    /// Fixed payload size of tokens produced by this strategy.
    pub fn payload_len(self) -> usize {
        match self {
            Self::Inherited => 0,
            Self::Explicit => EXPLICIT_PAYLOAD_LEN,
        }
    }
}

impl fmt::Display for DuplicationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inherited => write!(f, "inherited"),
            Self::Explicit => write!(f, "explicit"),
        }
    }
}

impl std::str::FromStr for DuplicationStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "inherited" | "inherit" => Ok(Self::Inherited),
            "explicit" => Ok(Self::Explicit),
            other => Err(format!("unknown duplication strategy `{other}`")),
        }
    }
}

// =============================================================================
// TOKEN
// =============================================================================

/// Unique identifier of a duplication token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TokenId(Uuid);

impl TokenId {
    /// Generate a fresh random id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Rebuild an id from its wire bytes.
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Wire bytes of this id.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque, single-use credential bound to one target process.
#[derive(Debug)]
pub struct DuplicationToken {
    id: TokenId,
    target_pid: u32,
    strategy: DuplicationStrategy,
    payload: Vec<u8>,
    #[cfg(unix)]
    attached: Option<std::os::fd::OwnedFd>,
}

impl DuplicationToken {
    /// Issue a fresh token for `target_pid`.
    pub fn issue(strategy: DuplicationStrategy, target_pid: u32, payload: Vec<u8>) -> Self {
        Self::from_parts(TokenId::generate(), strategy, target_pid, payload)
    }

    /// Rebuild a token from decoded wire fields.
    pub fn from_parts(
        id: TokenId,
        strategy: DuplicationStrategy,
        target_pid: u32,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            id,
            target_pid,
            strategy,
            payload,
            #[cfg(unix)]
            attached: None,
        }
    }

    pub fn id(&self) -> TokenId {
        self.id
    }

    pub fn target_pid(&self) -> u32 {
        self.target_pid
    }

    pub fn strategy(&self) -> DuplicationStrategy {
        self.strategy
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Whether this token was issued for `pid`.
    pub fn is_bound_to(&self, pid: u32) -> bool {
        self.target_pid == pid
    }

    /// Attach a duplicated descriptor to travel with this token.
    #[cfg(unix)]
    pub fn attach_fd(&mut self, fd: std::os::fd::OwnedFd) {
        self.attached = Some(fd);
    }

    /// Whether a duplicated descriptor travels with this token.
    #[cfg(unix)]
    pub fn has_attached_fd(&self) -> bool {
        self.attached.is_some()
    }

    /// Borrow the attached descriptor, if any.
    #[cfg(unix)]
    pub fn attached_fd(&self) -> Option<std::os::fd::BorrowedFd<'_>> {
        use std::os::fd::AsFd;
        self.attached.as_ref().map(|fd| fd.as_fd())
    }

    /// Take the attached descriptor out of the token.
    #[cfg(unix)]
    pub fn take_attached_fd(&mut self) -> Option<std::os::fd::OwnedFd> {
        self.attached.take()
    }
}

// =============================================================================
// LEDGER
// =============================================================================

/// Record of consumed token ids.
#[derive(Debug, Default)]
pub struct TokenLedger {
    consumed: Mutex<HashSet<TokenId>>,
}

impl TokenLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The ledger every duplicator in this process consults.
    pub fn global() -> &'static TokenLedger {
        static GLOBAL: OnceLock<TokenLedger> = OnceLock::new();
        GLOBAL.get_or_init(TokenLedger::new)
    }

    /// Mark `id` consumed. Returns `false` if it had been consumed before.
    pub fn consume(&self, id: TokenId) -> bool {
        self.consumed.lock().insert(id)
    }

    pub fn is_consumed(&self, id: TokenId) -> bool {
        self.consumed.lock().contains(&id)
    }

    /// Number of tokens consumed so far.
    pub fn len(&self) -> usize {
        self.consumed.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_tags_round_trip() {
        for strategy in [DuplicationStrategy::Inherited, DuplicationStrategy::Explicit] {
            assert_eq!(DuplicationStrategy::from_tag(strategy.tag()), Some(strategy));
        }
        assert_eq!(DuplicationStrategy::from_tag(0), None);
        assert_eq!(DuplicationStrategy::from_tag(9), None);
    }

    #[test]
    fn test_strategy_parses_from_config_text() {
        assert_eq!("Explicit".parse::<DuplicationStrategy>(), Ok(DuplicationStrategy::Explicit));
        assert_eq!("inherit".parse::<DuplicationStrategy>(), Ok(DuplicationStrategy::Inherited));
        assert!("fork".parse::<DuplicationStrategy>().is_err());
    }

    #[test]
    fn test_issued_tokens_are_unique_and_bound() {
        let a = DuplicationToken::issue(DuplicationStrategy::Inherited, 42, Vec::new());
        let b = DuplicationToken::issue(DuplicationStrategy::Inherited, 42, Vec::new());
        assert_ne!(a.id(), b.id());
        assert!(a.is_bound_to(42));
        assert!(!a.is_bound_to(43));
    }

    #[test]
    fn test_ledger_rejects_second_consumption() {
        let ledger = TokenLedger::new();
        let id = TokenId::generate();

        assert!(ledger.is_empty());
        assert!(ledger.consume(id));
        assert!(ledger.is_consumed(id));
        assert!(!ledger.consume(id));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_global_ledger_is_shared() {
        let id = TokenId::generate();
        assert!(TokenLedger::global().consume(id));
        assert!(std::ptr::eq(TokenLedger::global(), TokenLedger::global()));
        assert!(TokenLedger::global().is_consumed(id));
    }
}
