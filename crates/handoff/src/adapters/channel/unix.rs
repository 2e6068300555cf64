//! Unix channel endpoint: a Unix domain socket file per channel.
//!
//! The descriptor attached to an explicit-duplication token is passed as
//! `SCM_RIGHTS` ancillary data right after the frame.

use std::io::{self, ErrorKind};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::path::{Path, PathBuf};

use passfd::FdPassingExt;
use tokio::io::Interest;
use tokio::net::{UnixListener, UnixStream};
use tracing::debug;

use crate::domain::{ChannelName, DuplicationStrategy, DuplicationToken};

pub(super) type ServerStream = UnixStream;
pub(super) type ClientStream = UnixStream;

/// Socket file backing `name` inside `dir`.
pub(super) fn endpoint_path(name: &ChannelName, dir: &Path) -> PathBuf {
    dir.join(format!("{name}.sock"))
}

/// Listening side of one channel. Removes its socket file when torn down.
#[derive(Debug)]
pub(super) struct Endpoint {
    listener: Option<UnixListener>,
    path: PathBuf,
}

impl Endpoint {
    pub(super) fn create(name: &ChannelName, dir: &Path) -> io::Result<Self> {
        let path = endpoint_path(name, dir);
        // Stale file left by a crashed process that had the same pid.
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        let listener = UnixListener::bind(&path)?;
        Ok(Self {
            listener: Some(listener),
            path,
        })
    }

    /// Accept the next peer. The socket file stays until [`teardown`].
    ///
    /// [`teardown`]: Endpoint::teardown
    pub(super) async fn accept(&mut self) -> io::Result<ServerStream> {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| io::Error::new(ErrorKind::NotConnected, "endpoint torn down"))?;
        let (stream, _addr) = listener.accept().await?;
        Ok(stream)
    }

    /// Drop a peer that is not the expected worker.
    pub(super) fn reject(&mut self, stream: ServerStream) -> io::Result<()> {
        drop(stream);
        Ok(())
    }

    pub(super) fn teardown(&mut self) {
        if self.listener.take().is_some() {
            if let Err(e) = std::fs::remove_file(&self.path) {
                debug!(path = %self.path.display(), error = %e, "socket file already gone");
            }
        }
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Process id of the connected peer, from `SO_PEERCRED` or its platform
/// equivalent.
pub(super) fn peer_pid(stream: &ServerStream) -> io::Result<Option<u32>> {
    Ok(stream
        .peer_cred()?
        .pid()
        .and_then(|pid| u32::try_from(pid).ok()))
}

pub(super) async fn connect(name: &ChannelName, dir: &Path) -> io::Result<ClientStream> {
    UnixStream::connect(endpoint_path(name, dir)).await
}

/// Connect failures that mean the endpoint is not up yet.
pub(super) fn is_not_ready(e: &io::Error) -> bool {
    matches!(e.kind(), ErrorKind::NotFound | ErrorKind::ConnectionRefused)
}

pub(super) async fn send_attachment(
    stream: &ServerStream,
    token: &DuplicationToken,
) -> io::Result<()> {
    let Some(fd) = token.attached_fd() else {
        return Ok(());
    };
    let fd = fd.as_raw_fd();
    loop {
        stream.writable().await?;
        match stream.try_io(Interest::WRITABLE, || stream.as_raw_fd().send_fd(fd)) {
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => continue,
            other => return other,
        }
    }
}

pub(super) async fn recv_attachment(
    stream: &ClientStream,
    token: &mut DuplicationToken,
) -> io::Result<()> {
    if token.strategy() != DuplicationStrategy::Explicit {
        return Ok(());
    }
    let raw = loop {
        stream.readable().await?;
        match stream.try_io(Interest::READABLE, || stream.as_raw_fd().recv_fd()) {
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => continue,
            other => break other?,
        }
    };
    // SAFETY: recv_fd hands us a freshly installed descriptor nobody else owns.
    token.attach_fd(unsafe { OwnedFd::from_raw_fd(raw) });
    Ok(())
}
