//! Explicit duplication for a known target pid.
//!
//! - Unix: the socket is `dup`ed and the copy travels with the token as
//!   `SCM_RIGHTS` ancillary data.
//! - Windows: `WSADuplicateSocketW` serializes the socket into a
//!   `WSAPROTOCOL_INFOW`, carried as the token payload, and the worker
//!   recreates it with `WSASocketW`.

use super::{admit_token, ensure_target_pid};
use crate::domain::{
    ConnectionHandle, DuplicationStrategy, DuplicationToken, RawHandleValue, TokenLedger,
};
use crate::error::{HandoffError, ReconstructionError};
use crate::ports::{SocketDuplicator, SpawnRequest};

#[derive(Debug, Default, Clone, Copy)]
pub struct ExplicitDuplicator;

impl ExplicitDuplicator {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl SocketDuplicator for ExplicitDuplicator {
    fn strategy(&self) -> DuplicationStrategy {
        DuplicationStrategy::Explicit
    }

    fn prepare_spawn(&self, _conn: &ConnectionHandle, _request: &mut SpawnRequest) {}

    fn duplicate_for(
        &self,
        conn: &ConnectionHandle,
        pid: u32,
    ) -> Result<DuplicationToken, HandoffError> {
        ensure_target_pid(pid)?;
        platform::duplicate(conn, pid).map_err(|e| HandoffError::Duplication {
            pid,
            reason: e.to_string(),
        })
    }

    fn reconstruct(
        &self,
        _raw: RawHandleValue,
        mut token: DuplicationToken,
    ) -> Result<ConnectionHandle, ReconstructionError> {
        admit_token(&token, DuplicationStrategy::Explicit, TokenLedger::global())?;
        platform::materialize(&mut token)
    }
}

// ============================================================================
// Unix Implementation
// ============================================================================

#[cfg(unix)]
mod platform {
    use std::io;
    use std::net::TcpStream;
    use std::os::fd::{AsRawFd, OwnedFd};

    use crate::adapters::duplicator::ensure_socket;
    use crate::domain::{ConnectionHandle, DuplicationStrategy, DuplicationToken};
    use crate::error::ReconstructionError;

    pub(super) fn duplicate(conn: &ConnectionHandle, pid: u32) -> io::Result<DuplicationToken> {
        let copy = OwnedFd::from(conn.stream().try_clone()?);
        let mut token = DuplicationToken::issue(DuplicationStrategy::Explicit, pid, Vec::new());
        token.attach_fd(copy);
        Ok(token)
    }

    pub(super) fn materialize(
        token: &mut DuplicationToken,
    ) -> Result<ConnectionHandle, ReconstructionError> {
        let fd = token
            .take_attached_fd()
            .ok_or(ReconstructionError::MissingDescriptor)?;
        ensure_socket(fd.as_raw_fd())?;
        let stream = TcpStream::from(fd);
        let peer = stream.peer_addr().ok();
        Ok(ConnectionHandle::new(stream, peer))
    }
}

// ============================================================================
// Windows Implementation
// ============================================================================

#[cfg(windows)]
mod platform {
    use std::io;
    use std::mem::{self, MaybeUninit};
    use std::net::TcpStream;
    use std::os::windows::io::{AsRawSocket, FromRawSocket, RawSocket};
    use std::sync::OnceLock;

    use windows_sys::Win32::Networking::WinSock::{
        WSADuplicateSocketW, WSAGetLastError, WSASocketW, WSAStartup, INVALID_SOCKET, SOCKET,
        WSADATA, WSAPROTOCOL_INFOW, WSA_FLAG_OVERLAPPED,
    };

    use crate::domain::{ConnectionHandle, DuplicationStrategy, DuplicationToken};
    use crate::error::ReconstructionError;

    const PROTOCOL_INFO_SIZE: usize = mem::size_of::<WSAPROTOCOL_INFOW>();

    fn ensure_winsock_initialized() -> io::Result<()> {
        static STARTUP: OnceLock<i32> = OnceLock::new();
        let result = *STARTUP.get_or_init(|| {
            let mut wsa_data: MaybeUninit<WSADATA> = MaybeUninit::uninit();
            // SAFETY: WSAStartup only fills the provided buffer.
            unsafe { WSAStartup(0x0202, wsa_data.as_mut_ptr()) }
        });
        if result != 0 {
            return Err(io::Error::from_raw_os_error(result));
        }
        Ok(())
    }

    pub(super) fn duplicate(conn: &ConnectionHandle, pid: u32) -> io::Result<DuplicationToken> {
        ensure_winsock_initialized()?;
        let socket = conn.stream().as_raw_socket() as SOCKET;
        let mut info: MaybeUninit<WSAPROTOCOL_INFOW> = MaybeUninit::uninit();

        // SAFETY: `info` is a correctly sized out-buffer.
        if unsafe { WSADuplicateSocketW(socket, pid, info.as_mut_ptr()) } != 0 {
            return Err(io::Error::from_raw_os_error(unsafe { WSAGetLastError() }));
        }
        // SAFETY: WSADuplicateSocketW succeeded and filled the structure.
        let info = unsafe { info.assume_init() };
        // SAFETY: WSAPROTOCOL_INFOW is plain data.
        let bytes = unsafe {
            std::slice::from_raw_parts(&info as *const _ as *const u8, PROTOCOL_INFO_SIZE)
        };
        Ok(DuplicationToken::issue(
            DuplicationStrategy::Explicit,
            pid,
            bytes.to_vec(),
        ))
    }

    pub(super) fn materialize(
        token: &mut DuplicationToken,
    ) -> Result<ConnectionHandle, ReconstructionError> {
        if token.payload().len() != PROTOCOL_INFO_SIZE {
            return Err(ReconstructionError::MissingDescriptor);
        }
        ensure_winsock_initialized()?;
        // SAFETY: the payload has exactly the size of the structure.
        let info: WSAPROTOCOL_INFOW =
            unsafe { std::ptr::read_unaligned(token.payload().as_ptr() as *const _) };

        // SAFETY: `info` came from WSADuplicateSocketW for this process.
        let socket = unsafe {
            WSASocketW(
                info.iAddressFamily,
                info.iSocketType,
                info.iProtocol,
                &info as *const _ as *mut _,
                0,
                WSA_FLAG_OVERLAPPED,
            )
        };
        if socket == INVALID_SOCKET {
            return Err(io::Error::from_raw_os_error(unsafe { WSAGetLastError() }).into());
        }

        // SAFETY: WSASocketW returned a fresh socket owned by nobody else.
        let stream = unsafe { TcpStream::from_raw_socket(socket as RawSocket) };
        let peer = stream.peer_addr().ok();
        Ok(ConnectionHandle::new(stream, peer))
    }
}
