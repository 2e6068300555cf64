//! Windows channel endpoint: one named pipe instance per channel.
//!
//! Explicit-duplication tokens carry everything in their payload, so no
//! attachment travels next to the frame.

use std::io;
use std::os::windows::io::AsRawHandle;
use std::path::Path;

use tokio::net::windows::named_pipe::{
    ClientOptions, NamedPipeClient, NamedPipeServer, ServerOptions,
};
use tracing::debug;
use windows_sys::Win32::Foundation::{ERROR_FILE_NOT_FOUND, ERROR_PIPE_BUSY, HANDLE};
use windows_sys::Win32::System::Pipes::GetNamedPipeClientProcessId;

use crate::domain::{ChannelName, DuplicationToken};

pub(super) type ServerStream = NamedPipeServer;
pub(super) type ClientStream = NamedPipeClient;

pub(super) fn endpoint_path(name: &ChannelName, _dir: &Path) -> String {
    format!(r"\\.\pipe\{name}")
}

#[derive(Debug)]
pub(super) struct Endpoint {
    server: Option<NamedPipeServer>,
}

impl Endpoint {
    pub(super) fn create(name: &ChannelName, dir: &Path) -> io::Result<Self> {
        let server = ServerOptions::new()
            .first_pipe_instance(true)
            .max_instances(1)
            .create(endpoint_path(name, dir))?;
        Ok(Self {
            server: Some(server),
        })
    }

    /// Wait for the single client. Dropping the future cancels the pending
    /// overlapped connect.
    pub(super) async fn accept(&mut self) -> io::Result<ServerStream> {
        let server = self
            .server
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "endpoint torn down"))?;
        server.connect().await?;
        self.server
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "endpoint torn down"))
    }

    /// Disconnect a peer that is not the expected worker and listen again
    /// on the same instance.
    pub(super) fn reject(&mut self, stream: ServerStream) -> io::Result<()> {
        stream.disconnect()?;
        self.server = Some(stream);
        Ok(())
    }

    pub(super) fn teardown(&mut self) {
        if let Some(server) = self.server.take() {
            if let Err(e) = server.disconnect() {
                debug!(error = %e, "pipe instance already disconnected");
            }
        }
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Process id of the pipe client.
pub(super) fn peer_pid(stream: &ServerStream) -> io::Result<Option<u32>> {
    let mut pid = 0u32;
    // SAFETY: the handle belongs to a live pipe instance and `pid` is a
    // valid out-pointer.
    let ok = unsafe { GetNamedPipeClientProcessId(stream.as_raw_handle() as HANDLE, &mut pid) };
    if ok == 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(Some(pid))
}

pub(super) async fn connect(name: &ChannelName, dir: &Path) -> io::Result<ClientStream> {
    ClientOptions::new().open(endpoint_path(name, dir))
}

pub(super) fn is_not_ready(e: &io::Error) -> bool {
    matches!(
        e.raw_os_error(),
        Some(code) if code == ERROR_PIPE_BUSY as i32 || code == ERROR_FILE_NOT_FOUND as i32
    )
}

pub(super) async fn send_attachment(
    _stream: &ServerStream,
    _token: &DuplicationToken,
) -> io::Result<()> {
    Ok(())
}

pub(super) async fn recv_attachment(
    _stream: &ClientStream,
    _token: &mut DuplicationToken,
) -> io::Result<()> {
    Ok(())
}
