//! # Connection Handles
//!
//! An established TCP connection plus the peer address captured when it was
//! accepted. A handle has exactly one owner: it is moved, never cloned, and
//! closing it only releases the local descriptor (the connection itself stays
//! open in any other process holding a duplicate).

use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};

/// Raw OS descriptor value of a connection, widened to `u64` for the wire.
///
/// File descriptor on Unix, `SOCKET` on Windows.
pub type RawHandleValue = u64;

/// An owned, established connection.
#[derive(Debug)]
pub struct ConnectionHandle {
    stream: TcpStream,
    peer: Option<SocketAddr>,
}

impl ConnectionHandle {
    /// Wrap an already connected stream.
    pub fn new(stream: TcpStream, peer: Option<SocketAddr>) -> Self {
        Self { stream, peer }
    }

    /// Take ownership of a tokio stream returned by an async accept.
    ///
    /// The stream is switched back to blocking mode, which is the mode a
    /// worker expects to find on an inherited or duplicated descriptor.
    pub fn from_tokio(stream: tokio::net::TcpStream, peer: SocketAddr) -> io::Result<Self> {
        let stream = stream.into_std()?;
        stream.set_nonblocking(false)?;
        Ok(Self::new(stream, Some(peer)))
    }

    /// Open a client connection to `host:port`.
    ///
    /// Every resolved address is tried in order; the last error is returned
    /// when none of them accepts.
    pub fn connect(host: &str, port: u16) -> io::Result<Self> {
        let mut last_err = io::Error::new(io::ErrorKind::NotFound, "host resolved to no addresses");
        for addr in (host, port).to_socket_addrs()? {
            match TcpStream::connect(addr) {
                Ok(stream) => return Ok(Self::new(stream, Some(addr))),
                Err(e) => last_err = e,
            }
        }
        Err(last_err)
    }

    /// Peer address recorded at accept/connect time.
    pub fn peer_address(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Peer IP as text, or an empty string when unknown.
    pub fn peer_ip(&self) -> String {
        self.peer.map(|p| p.ip().to_string()).unwrap_or_default()
    }

    /// The OS descriptor value of this connection.
    pub fn raw_value(&self) -> RawHandleValue {
        #[cfg(unix)]
        {
            use std::os::fd::AsRawFd;
            u64::from(self.stream.as_raw_fd().unsigned_abs())
        }
        #[cfg(windows)]
        {
            use std::os::windows::io::AsRawSocket;
            self.stream.as_raw_socket()
        }
    }

    /// Borrow the underlying stream.
    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }

    /// Enable or disable Nagle's algorithm on the connection.
    pub fn set_nodelay(&self, on: bool) -> io::Result<()> {
        self.stream.set_nodelay(on)
    }

    /// Convert into a non-blocking tokio stream for serving.
    pub fn into_tokio(self) -> io::Result<tokio::net::TcpStream> {
        self.stream.set_nonblocking(true)?;
        tokio::net::TcpStream::from_std(self.stream)
    }

    /// Release this process's reference to the connection.
    ///
    /// Does not shut the connection down: a worker holding a duplicate keeps
    /// a fully usable socket.
    pub fn close(self) {
        drop(self.stream);
    }
}
