//! # Socket Duplicators
//!
//! | Strategy | Platform | Parent side | Worker side |
//! |----------|----------|-------------|-------------|
//! | Inherited | Unix | fd survives exec | adopt the raw fd |
//! | Explicit | Unix | `dup`, sent as `SCM_RIGHTS` | adopt the received fd |
//! | Explicit | Windows | `WSADuplicateSocketW` | `WSASocketW` |
//!
//! The strategy is picked once per process with [`select_duplicator`].

use std::sync::Arc;

use tracing::info;

use crate::domain::{DuplicationStrategy, DuplicationToken, TokenLedger};
use crate::error::{HandoffError, ReconstructionError};
use crate::ports::SocketDuplicator;

mod explicit;
#[cfg(unix)]
mod inherited;

pub use explicit::ExplicitDuplicator;
#[cfg(unix)]
pub use inherited::InheritedDuplicator;

/// Pid of the current process.
pub fn current_pid() -> u32 {
    std::process::id()
}

/// Platform default strategy.
pub fn default_strategy() -> DuplicationStrategy {
    if cfg!(unix) {
        DuplicationStrategy::Inherited
    } else {
        DuplicationStrategy::Explicit
    }
}

/// Pick the duplicator for this process.
///
/// Windows cannot inherit sockets through process creation; a request for
/// inheritance there falls back to explicit duplication.
pub fn select_duplicator(requested: Option<DuplicationStrategy>) -> Arc<dyn SocketDuplicator> {
    let strategy = requested.unwrap_or_else(default_strategy);

    let duplicator: Arc<dyn SocketDuplicator> = match strategy {
        #[cfg(unix)]
        DuplicationStrategy::Inherited => Arc::new(InheritedDuplicator::new()),
        #[cfg(not(unix))]
        DuplicationStrategy::Inherited => {
            tracing::warn!("descriptor inheritance is unavailable on this platform, using explicit duplication");
            Arc::new(ExplicitDuplicator::new())
        }
        DuplicationStrategy::Explicit => Arc::new(ExplicitDuplicator::new()),
    };
    info!(strategy = %duplicator.strategy(), "socket duplication strategy selected");
    duplicator
}

/// Reject duplication targets that cannot receive a socket.
pub(crate) fn ensure_target_pid(pid: u32) -> Result<(), HandoffError> {
    let reject = |reason: &str| HandoffError::Duplication {
        pid,
        reason: reason.to_string(),
    };
    if pid == 0 {
        return Err(reject("pid 0 is not a process"));
    }
    if pid == current_pid() {
        return Err(reject("target is the owning process"));
    }
    if !process_exists(pid) {
        return Err(reject("no such process"));
    }
    Ok(())
}

#[cfg(unix)]
fn process_exists(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // SAFETY: signal 0 only performs the existence and permission check.
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(windows)]
fn process_exists(pid: u32) -> bool {
    use windows_sys::Win32::Foundation::CloseHandle;
    use windows_sys::Win32::System::Threading::{OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION};

    // SAFETY: the handle is checked and closed before returning.
    unsafe {
        let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid);
        if handle.is_null() {
            return false;
        }
        CloseHandle(handle);
    }
    true
}

/// Checks shared by every strategy before a token is materialized.
///
/// Duplicators pass [`TokenLedger::global`], so a token id is admitted once
/// per process whichever duplicator sees it. The ledger entry is written
/// last, so a token rejected for another reason is not marked consumed.
pub(crate) fn admit_token(
    token: &DuplicationToken,
    local: DuplicationStrategy,
    ledger: &TokenLedger,
) -> Result<(), ReconstructionError> {
    let current = current_pid();
    if !token.is_bound_to(current) {
        return Err(ReconstructionError::WrongProcess {
            token: token.id(),
            bound_pid: token.target_pid(),
            current_pid: current,
        });
    }
    if token.strategy() != local {
        return Err(ReconstructionError::StrategyMismatch {
            token: token.strategy().to_string(),
            local: local.to_string(),
        });
    }
    if !ledger.consume(token.id()) {
        return Err(ReconstructionError::AlreadyConsumed(token.id()));
    }
    Ok(())
}

/// Fail unless `fd` is an open socket.
#[cfg(unix)]
pub(crate) fn ensure_socket(fd: std::os::fd::RawFd) -> Result<(), ReconstructionError> {
    let raw = u64::from(fd.unsigned_abs());
    let mut stat = std::mem::MaybeUninit::<libc::stat>::uninit();
    // SAFETY: fstat only writes into the provided buffer.
    if unsafe { libc::fstat(fd, stat.as_mut_ptr()) } != 0 {
        let err = std::io::Error::last_os_error();
        return Err(if err.raw_os_error() == Some(libc::EBADF) {
            ReconstructionError::InvalidHandle(raw)
        } else {
            ReconstructionError::Os(err)
        });
    }
    // SAFETY: fstat succeeded, so the buffer is initialized.
    let stat = unsafe { stat.assume_init() };
    if stat.st_mode & libc::S_IFMT != libc::S_IFSOCK {
        return Err(ReconstructionError::NotASocket(raw));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_pid_zero_and_self() {
        assert!(matches!(
            ensure_target_pid(0),
            Err(HandoffError::Duplication { pid: 0, .. })
        ));
        assert!(ensure_target_pid(current_pid()).is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_accepts_live_child_and_rejects_reaped_one() {
        let mut child = tokio::process::Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id().unwrap();
        assert!(ensure_target_pid(pid).is_ok());

        child.kill().await.unwrap();
        let err = ensure_target_pid(pid).unwrap_err();
        assert_eq!(err.kind(), "duplication");
    }

    #[test]
    fn test_admit_token_checks_pid_strategy_and_reuse() {
        let ledger = TokenLedger::new();

        let foreign = DuplicationToken::issue(DuplicationStrategy::Explicit, current_pid() + 1, Vec::new());
        assert!(matches!(
            admit_token(&foreign, DuplicationStrategy::Explicit, &ledger),
            Err(ReconstructionError::WrongProcess { .. })
        ));

        let token = DuplicationToken::issue(DuplicationStrategy::Explicit, current_pid(), Vec::new());
        assert!(matches!(
            admit_token(&token, DuplicationStrategy::Inherited, &ledger),
            Err(ReconstructionError::StrategyMismatch { .. })
        ));
        // Rejections above did not consume the token.
        assert!(!ledger.is_consumed(token.id()));

        assert!(admit_token(&token, DuplicationStrategy::Explicit, &ledger).is_ok());
        assert!(matches!(
            admit_token(&token, DuplicationStrategy::Explicit, &ledger),
            Err(ReconstructionError::AlreadyConsumed(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_token_replay_is_rejected_across_duplicators() {
        use std::net::{TcpListener, TcpStream};
        use std::os::fd::IntoRawFd;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (_server, _) = listener.accept().unwrap();
        let raw = client.into_raw_fd() as u64;

        let id = crate::domain::TokenId::generate();
        let token = || {
            DuplicationToken::from_parts(id, DuplicationStrategy::Inherited, current_pid(), Vec::new())
        };

        let first = select_duplicator(Some(DuplicationStrategy::Inherited));
        let conn = first.reconstruct(raw, token()).unwrap();

        let second = select_duplicator(Some(DuplicationStrategy::Inherited));
        assert!(matches!(
            second.reconstruct(raw, token()),
            Err(ReconstructionError::AlreadyConsumed(replayed)) if replayed == id
        ));
        assert!(TokenLedger::global().is_consumed(id));
        drop(conn);
    }

    #[test]
    fn test_select_duplicator_honours_request() {
        let explicit = select_duplicator(Some(DuplicationStrategy::Explicit));
        assert_eq!(explicit.strategy(), DuplicationStrategy::Explicit);

        let auto = select_duplicator(None);
        assert_eq!(auto.strategy(), default_strategy());

        let inherited = select_duplicator(Some(DuplicationStrategy::Inherited));
        #[cfg(unix)]
        assert_eq!(inherited.strategy(), DuplicationStrategy::Inherited);
        #[cfg(windows)]
        assert_eq!(inherited.strategy(), DuplicationStrategy::Explicit);
    }
}
