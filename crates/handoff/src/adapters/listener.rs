//! # Connection Listener
//!
//! Owns the listening socket. Accepts are bounded by an optional deadline and
//! transient accept failures are retried internally.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use tokio::net::{TcpListener, TcpSocket};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::domain::ConnectionHandle;
use crate::error::HandoffError;

/// Default listen queue length.
pub const DEFAULT_BACKLOG: u32 = 30;

/// Default bind address: every IPv4 interface.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0";

/// A bound, listening TCP socket.
#[derive(Debug)]
pub struct ConnectionListener {
    listener: TcpListener,
    last_remote: Option<String>,
}

impl ConnectionListener {
    /// Bind `bind_address:port` with address reuse and start listening.
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind(port: u16, backlog: u32, bind_address: &str) -> Result<Self, HandoffError> {
        let address = format!("{bind_address}:{port}");
        let bind_err = |source: io::Error| HandoffError::Bind {
            address: address.clone(),
            source,
        };

        let ip: IpAddr = bind_address.parse().map_err(|_| {
            bind_err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("`{bind_address}` is not an IP address"),
            ))
        })?;
        let addr = SocketAddr::new(ip, port);

        let socket = match addr {
            SocketAddr::V4(_) => TcpSocket::new_v4(),
            SocketAddr::V6(_) => TcpSocket::new_v6(),
        }
        .map_err(bind_err)?;
        socket.set_reuseaddr(true).map_err(bind_err)?;
        socket.bind(addr).map_err(bind_err)?;
        let listener = socket.listen(backlog).map_err(bind_err)?;

        debug!(address = %address, backlog, "listener bound");
        Ok(Self {
            listener,
            last_remote: None,
        })
    }

    /// Address actually bound (resolves port 0).
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// IP of the most recently accepted peer.
    pub fn last_remote_address(&self) -> Option<&str> {
        self.last_remote.as_deref()
    }

    /// Accept one connection.
    ///
    /// Returns `Ok(None)` when `deadline` elapses first.
    pub async fn accept(
        &mut self,
        deadline: Option<Duration>,
    ) -> Result<Option<ConnectionHandle>, HandoffError> {
        let until = deadline.map(|d| Instant::now() + d);
        loop {
            let accepted = match until {
                Some(until) => match tokio::time::timeout_at(until, self.listener.accept()).await {
                    Ok(result) => result,
                    Err(_) => return Ok(None),
                },
                None => self.listener.accept().await,
            };

            match accepted {
                Ok((stream, peer)) => {
                    let conn = ConnectionHandle::from_tokio(stream, peer)
                        .map_err(|source| HandoffError::Accept { source, fatal: false })?;
                    self.last_remote = Some(peer.ip().to_string());
                    debug!(peer = %peer, "accepted connection");
                    return Ok(Some(conn));
                }
                Err(e) if is_transient(&e) => {
                    debug!(error = %e, "transient accept failure, retrying");
                    continue;
                }
                Err(e) => {
                    let fatal = is_fatal(&e);
                    warn!(error = %e, fatal, "accept failed");
                    return Err(HandoffError::Accept { source: e, fatal });
                }
            }
        }
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::Interrupted
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::WouldBlock
    )
}

/// Errors after which the listening socket is unusable.
fn is_fatal(e: &io::Error) -> bool {
    #[cfg(unix)]
    let fatal_codes = [libc::EBADF, libc::ENOTSOCK, libc::EINVAL];
    #[cfg(windows)]
    let fatal_codes = [
        windows_sys::Win32::Networking::WinSock::WSAEBADF,
        windows_sys::Win32::Networking::WinSock::WSAENOTSOCK,
        windows_sys::Win32::Networking::WinSock::WSAEINVAL,
    ];
    e.raw_os_error().is_some_and(|code| fatal_codes.contains(&code))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_accept_records_last_remote_address() {
        let mut listener = ConnectionListener::bind(0, DEFAULT_BACKLOG, "127.0.0.1").unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(listener.last_remote_address().is_none());

        let client = tokio::task::spawn_blocking(move || ConnectionHandle::connect("127.0.0.1", port));
        let conn = listener
            .accept(Some(Duration::from_secs(5)))
            .await
            .unwrap()
            .unwrap();
        client.await.unwrap().unwrap();

        assert_eq!(listener.last_remote_address(), Some("127.0.0.1"));
        assert_eq!(conn.peer_ip(), "127.0.0.1");
    }

    #[tokio::test]
    async fn test_accept_deadline_returns_none() {
        let mut listener = ConnectionListener::bind(0, DEFAULT_BACKLOG, "127.0.0.1").unwrap();
        let started = std::time::Instant::now();
        let accepted = listener.accept(Some(Duration::from_millis(50))).await.unwrap();
        assert!(accepted.is_none());
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_bind_conflict_is_fatal_bind_error() {
        let first = ConnectionListener::bind(0, DEFAULT_BACKLOG, "127.0.0.1").unwrap();
        let port = first.local_addr().unwrap().port();

        let err = ConnectionListener::bind(port, DEFAULT_BACKLOG, "127.0.0.1").unwrap_err();
        assert!(matches!(err, HandoffError::Bind { .. }));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_bind_rejects_non_ip_address() {
        let err = ConnectionListener::bind(0, DEFAULT_BACKLOG, "not-an-ip").unwrap_err();
        assert_eq!(err.kind(), "bind");
    }

    #[test]
    fn test_error_classification() {
        assert!(is_transient(&io::Error::from(io::ErrorKind::Interrupted)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::PermissionDenied)));
        #[cfg(unix)]
        assert!(is_fatal(&io::Error::from_raw_os_error(libc::EBADF)));
        assert!(!is_fatal(&io::Error::from(io::ErrorKind::Other)));
    }
}
