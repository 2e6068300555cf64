//! Descriptor inheritance: the worker receives the socket at exec time and
//! only needs to learn which descriptor value to adopt.

use std::net::TcpStream;
use std::os::fd::{FromRawFd, RawFd};

use super::{admit_token, ensure_socket, ensure_target_pid};
use crate::domain::{
    ConnectionHandle, DuplicationStrategy, DuplicationToken, RawHandleValue, TokenLedger,
};
use crate::error::{HandoffError, ReconstructionError};
use crate::ports::{SocketDuplicator, SpawnRequest};

#[derive(Debug, Default, Clone, Copy)]
pub struct InheritedDuplicator;

impl InheritedDuplicator {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl SocketDuplicator for InheritedDuplicator {
    fn strategy(&self) -> DuplicationStrategy {
        DuplicationStrategy::Inherited
    }

    fn prepare_spawn(&self, conn: &ConnectionHandle, request: &mut SpawnRequest) {
        request.inherit.push(conn.raw_value());
    }

    fn duplicate_for(
        &self,
        _conn: &ConnectionHandle,
        pid: u32,
    ) -> Result<DuplicationToken, HandoffError> {
        ensure_target_pid(pid)?;
        Ok(DuplicationToken::issue(
            DuplicationStrategy::Inherited,
            pid,
            Vec::new(),
        ))
    }

    fn reconstruct(
        &self,
        raw: RawHandleValue,
        token: DuplicationToken,
    ) -> Result<ConnectionHandle, ReconstructionError> {
        admit_token(&token, DuplicationStrategy::Inherited, TokenLedger::global())?;

        let fd = RawFd::try_from(raw).map_err(|_| ReconstructionError::InvalidHandle(raw))?;
        ensure_socket(fd)?;

        // SAFETY: the descriptor was inherited for this process and the
        // process-wide ledger admits its token at most once.
        let stream = unsafe { TcpStream::from_raw_fd(fd) };
        let peer = stream.peer_addr().ok();
        Ok(ConnectionHandle::new(stream, peer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ChannelName, WorkerCommand};
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::os::fd::IntoRawFd;

    fn local_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    #[test]
    fn test_prepare_spawn_marks_descriptor_inherited() {
        let (client, _server) = local_pair();
        let conn = ConnectionHandle::new(client, None);
        let mut request = SpawnRequest::new(
            WorkerCommand::new("worker", Vec::new()),
            ChannelName::new("h-1").unwrap(),
        );

        InheritedDuplicator::new().prepare_spawn(&conn, &mut request);
        assert_eq!(request.inherit, vec![conn.raw_value()]);
    }

    #[test]
    fn test_reconstruct_adopts_descriptor_once() {
        let duplicator = InheritedDuplicator::new();
        let (client, mut server) = local_pair();
        let raw = client.into_raw_fd() as u64;

        let token = DuplicationToken::issue(DuplicationStrategy::Inherited, std::process::id(), Vec::new());
        let id = token.id();
        let conn = duplicator.reconstruct(raw, token).unwrap();
        assert_eq!(conn.peer_ip(), "127.0.0.1");

        let mut stream = conn.stream();
        stream.write_all(b"ping").unwrap();
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");

        // Same token bytes decoded again are refused.
        let replay = DuplicationToken::from_parts(id, DuplicationStrategy::Inherited, std::process::id(), Vec::new());
        assert!(matches!(
            duplicator.reconstruct(raw, replay),
            Err(ReconstructionError::AlreadyConsumed(_))
        ));
    }

    #[test]
    fn test_reconstruct_rejects_non_socket_and_closed_descriptors() {
        let duplicator = InheritedDuplicator::new();
        let file = tempfile::tempfile().unwrap();
        let fd = file.into_raw_fd();

        let token = DuplicationToken::issue(DuplicationStrategy::Inherited, std::process::id(), Vec::new());
        assert!(matches!(
            duplicator.reconstruct(fd as u64, token),
            Err(ReconstructionError::NotASocket(_))
        ));
        // SAFETY: the descriptor was released by into_raw_fd above.
        unsafe { libc::close(fd) };

        // Far above any descriptor this test process has open.
        let token = DuplicationToken::issue(DuplicationStrategy::Inherited, std::process::id(), Vec::new());
        assert!(matches!(
            duplicator.reconstruct(1 << 20, token),
            Err(ReconstructionError::InvalidHandle(_))
        ));

        let token = DuplicationToken::issue(DuplicationStrategy::Inherited, std::process::id(), Vec::new());
        assert!(matches!(
            duplicator.reconstruct(u64::MAX, token),
            Err(ReconstructionError::InvalidHandle(_))
        ));
    }
}
