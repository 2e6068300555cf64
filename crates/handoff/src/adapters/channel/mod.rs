//! # Handoff Channel
//!
//! A private, named, single-use byte channel between the listener and one
//! worker. It carries exactly one frame (raw handle value plus token).
//!
//! ## Lifecycle
//!
//! ```text
//! create ──► AwaitingPeer ──await_connection──► Connected ──send──► close ──► Closed
//!                 │                                 │
//!                 └──── timeout / error ──► Failed ─┘──────────► Closed
//! ```
//!
//! The endpoint is torn down on every exit path: explicitly by
//! [`HandoffChannel::close`], or by `Drop`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::domain::{
    encode_frame, ChannelName, ChannelState, DuplicationToken, FramePrefix, RawHandleValue,
    FRAME_PREFIX_LEN,
};
use crate::error::HandoffError;

#[cfg(unix)]
mod unix;
#[cfg(unix)]
use unix as imp;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
use windows as imp;

/// Environment variable carrying the channel name to the worker.
pub const CHANNEL_ENV: &str = "HANDOFF_CHANNEL";

/// Environment variable carrying the channel directory to the worker.
pub const CHANNEL_DIR_ENV: &str = "HANDOFF_CHANNEL_DIR";

/// Default wait for the worker to connect.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(5_000);

/// Default bound on writing or reading the frame.
pub const DEFAULT_TRANSFER_TIMEOUT: Duration = Duration::from_millis(5_000);

/// Interval between worker connect attempts while the endpoint is not up.
const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(20);

// =============================================================================
// PARENT SIDE
// =============================================================================

/// Listener-side end of a handoff channel.
#[derive(Debug)]
pub struct HandoffChannel {
    name: ChannelName,
    state: ChannelState,
    endpoint: Option<imp::Endpoint>,
    stream: Option<imp::ServerStream>,
    transfer_timeout: Duration,
}

impl HandoffChannel {
    /// Create the endpoint for `name`. The channel starts awaiting its peer.
    ///
    /// `dir` holds the socket file on Unix and is ignored on Windows.
    pub fn create(name: ChannelName, dir: &Path) -> Result<Self, HandoffError> {
        let endpoint = imp::Endpoint::create(&name, dir).map_err(|e| HandoffError::Channel {
            channel: name.clone(),
            reason: format!("endpoint creation failed: {e}"),
        })?;

        let mut channel = Self {
            name,
            state: ChannelState::Created,
            endpoint: Some(endpoint),
            stream: None,
            transfer_timeout: DEFAULT_TRANSFER_TIMEOUT,
        };
        channel.transition(ChannelState::AwaitingPeer)?;
        debug!(channel = %channel.name, "channel created");
        Ok(channel)
    }

    /// Bound applied to writing the frame.
    #[must_use]
    pub fn with_transfer_timeout(mut self, timeout: Duration) -> Self {
        self.transfer_timeout = timeout;
        self
    }

    pub fn name(&self) -> &ChannelName {
        &self.name
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Wait for worker `worker_pid` to connect.
    ///
    /// Peers whose process id is not `worker_pid` are disconnected and the
    /// wait continues. On timeout the pending accept is cancelled, the
    /// endpoint torn down and the channel fails.
    pub async fn await_connection(
        &mut self,
        worker_pid: u32,
        timeout: Duration,
    ) -> Result<(), HandoffError> {
        self.expect_state(ChannelState::AwaitingPeer, ChannelState::Connected)?;
        let timeout_ms = timeout.as_millis() as u64;
        let accepted = match self.endpoint.as_mut() {
            Some(endpoint) => {
                tokio::time::timeout(timeout, accept_worker(endpoint, &self.name, worker_pid)).await
            }
            None => return Err(self.invalid(ChannelState::Connected)),
        };
        match accepted {
            Ok(Ok(stream)) => {
                self.stream = Some(stream);
                if let Some(mut endpoint) = self.endpoint.take() {
                    endpoint.teardown();
                }
                self.transition(ChannelState::Connected)?;
                debug!(channel = %self.name, worker_pid, "worker connected");
                Ok(())
            }
            Ok(Err(e)) => {
                self.fail();
                Err(HandoffError::Channel {
                    channel: self.name.clone(),
                    reason: format!("accepting worker failed: {e}"),
                })
            }
            Err(_) => {
                self.fail();
                warn!(channel = %self.name, worker_pid, timeout_ms, "worker never connected");
                Err(HandoffError::ChannelTimeout {
                    channel: self.name.clone(),
                    timeout_ms,
                })
            }
        }
    }

    /// Write the frame for `raw` and `token` to the connected worker.
    ///
    /// Any short or failed write fails the channel.
    pub async fn send(
        &mut self,
        raw: RawHandleValue,
        token: DuplicationToken,
    ) -> Result<(), HandoffError> {
        if self.state != ChannelState::Connected {
            return Err(self.invalid(ChannelState::Closed));
        }

        let frame = encode_frame(raw, &token);
        let transfer_timeout = self.transfer_timeout;
        let written = match self.stream.as_mut() {
            Some(stream) => {
                let write = async {
                    stream.write_all(&frame).await?;
                    stream.flush().await?;
                    imp::send_attachment(stream, &token).await
                };
                tokio::time::timeout(transfer_timeout, write).await
            }
            None => return Err(self.invalid(ChannelState::Closed)),
        };

        match written {
            Ok(Ok(())) => {
                debug!(channel = %self.name, token = %token.id(), bytes = frame.len(), "frame sent");
                Ok(())
            }
            Ok(Err(e)) => {
                self.fail();
                Err(HandoffError::transfer("writing frame", e))
            }
            Err(_) => {
                self.fail();
                Err(HandoffError::transfer(
                    "writing frame",
                    format!("timed out after {} ms", transfer_timeout.as_millis()),
                ))
            }
        }
    }

    /// Release the channel. Idempotent.
    pub fn close(&mut self) {
        if self.state == ChannelState::Closed {
            return;
        }
        self.stream = None;
        if let Some(mut endpoint) = self.endpoint.take() {
            endpoint.teardown();
        }
        self.state = ChannelState::Closed;
        debug!(channel = %self.name, "channel closed");
    }

    fn fail(&mut self) {
        self.stream = None;
        if let Some(mut endpoint) = self.endpoint.take() {
            endpoint.teardown();
        }
        if self.state.can_transition_to(ChannelState::Failed) {
            self.state = ChannelState::Failed;
        }
    }

    fn transition(&mut self, to: ChannelState) -> Result<(), HandoffError> {
        if !self.state.can_transition_to(to) {
            return Err(self.invalid(to));
        }
        self.state = to;
        Ok(())
    }

    fn expect_state(&self, expected: ChannelState, to: ChannelState) -> Result<(), HandoffError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(self.invalid(to))
        }
    }

    fn invalid(&self, to: ChannelState) -> HandoffError {
        HandoffError::InvalidChannelState {
            channel: self.name.clone(),
            from: self.state,
            to,
        }
    }
}

/// Accept peers until the one running as `worker_pid` connects.
async fn accept_worker(
    endpoint: &mut imp::Endpoint,
    channel: &ChannelName,
    worker_pid: u32,
) -> std::io::Result<imp::ServerStream> {
    loop {
        let stream = endpoint.accept().await?;
        match imp::peer_pid(&stream) {
            Ok(Some(pid)) if pid == worker_pid => return Ok(stream),
            Ok(peer_pid) => {
                warn!(channel = %channel, worker_pid, ?peer_pid, "rejected channel peer");
            }
            Err(e) => {
                warn!(channel = %channel, worker_pid, error = %e, "channel peer has no credentials");
            }
        }
        endpoint.reject(stream)?;
    }
}

impl Drop for HandoffChannel {
    fn drop(&mut self) {
        self.close();
    }
}

// =============================================================================
// WORKER SIDE
// =============================================================================

/// Worker-side end of a handoff channel.
#[derive(Debug)]
pub struct ChannelClient {
    name: ChannelName,
    stream: imp::ClientStream,
}

impl ChannelClient {
    /// Connect to channel `name`, retrying until the endpoint appears or
    /// `timeout` elapses.
    pub async fn connect(
        name: ChannelName,
        dir: &Path,
        timeout: Duration,
    ) -> Result<Self, HandoffError> {
        let until = Instant::now() + timeout;
        loop {
            match imp::connect(&name, dir).await {
                Ok(stream) => {
                    debug!(channel = %name, "connected to channel");
                    return Ok(Self { name, stream });
                }
                Err(e) if imp::is_not_ready(&e) && Instant::now() < until => {
                    tokio::time::sleep(CONNECT_RETRY_INTERVAL).await;
                }
                Err(e) if imp::is_not_ready(&e) => {
                    return Err(HandoffError::ChannelTimeout {
                        channel: name,
                        timeout_ms: timeout.as_millis() as u64,
                    });
                }
                Err(e) => {
                    return Err(HandoffError::Channel {
                        channel: name,
                        reason: format!("connect failed: {e}"),
                    });
                }
            }
        }
    }

    /// Connect to the channel named by the worker environment.
    pub async fn connect_from_env(timeout: Duration) -> Result<Self, HandoffError> {
        let (name, dir) = channel_from_env()?;
        Self::connect(name, &dir, timeout).await
    }

    pub fn name(&self) -> &ChannelName {
        &self.name
    }

    /// Read the single frame sent by the listener.
    pub async fn receive(
        &mut self,
        timeout: Duration,
    ) -> Result<(RawHandleValue, DuplicationToken), HandoffError> {
        let stream = &mut self.stream;
        let read = async {
            let mut prefix = [0u8; FRAME_PREFIX_LEN];
            stream
                .read_exact(&mut prefix)
                .await
                .map_err(|e| HandoffError::transfer("reading frame header", e))?;
            let prefix = FramePrefix::decode(&prefix)?;

            let mut payload = vec![0u8; prefix.payload_len()];
            stream
                .read_exact(&mut payload)
                .await
                .map_err(|e| HandoffError::transfer("reading token payload", e))?;
            let (raw, mut token) = prefix.into_parts(payload)?;

            imp::recv_attachment(stream, &mut token)
                .await
                .map_err(|e| HandoffError::transfer("receiving descriptor", e))?;
            Ok::<_, HandoffError>((raw, token))
        };

        let (raw, token) = tokio::time::timeout(timeout, read).await.map_err(|_| {
            HandoffError::transfer("reading frame", format!("timed out after {} ms", timeout.as_millis()))
        })??;
        debug!(channel = %self.name, raw, token = %token.id(), "frame received");
        Ok((raw, token))
    }
}

/// Channel name and directory from `HANDOFF_CHANNEL` / `HANDOFF_CHANNEL_DIR`.
pub fn channel_from_env() -> Result<(ChannelName, PathBuf), HandoffError> {
    let name = std::env::var(CHANNEL_ENV)
        .map_err(|_| HandoffError::Config(format!("{CHANNEL_ENV} is not set")))?;
    let dir = std::env::var_os(CHANNEL_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir);
    Ok((ChannelName::new(name)?, dir))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::domain::{DuplicationStrategy, TokenId};

    fn name(n: &str) -> ChannelName {
        ChannelName::new(n).unwrap()
    }

    #[tokio::test]
    async fn test_frame_travels_from_listener_to_worker() {
        let dir = tempfile::tempdir().unwrap();
        let mut channel = HandoffChannel::create(name("h-1"), dir.path()).unwrap();
        assert_eq!(channel.state(), ChannelState::AwaitingPeer);

        let dir_path = dir.path().to_path_buf();
        let worker = tokio::spawn(async move {
            let mut client = ChannelClient::connect(name("h-1"), &dir_path, Duration::from_secs(2))
                .await
                .unwrap();
            client.receive(Duration::from_secs(2)).await.unwrap()
        });

        channel
            .await_connection(std::process::id(), Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(channel.state(), ChannelState::Connected);

        let token = DuplicationToken::issue(DuplicationStrategy::Inherited, 4242, Vec::new());
        let id: TokenId = token.id();
        channel.send(42, token).await.unwrap();
        channel.close();
        assert_eq!(channel.state(), ChannelState::Closed);

        let (raw, received) = worker.await.unwrap();
        assert_eq!(raw, 42);
        assert_eq!(received.id(), id);
        assert_eq!(received.target_pid(), 4242);
    }

    #[tokio::test]
    async fn test_await_connection_times_out_and_removes_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let mut channel = HandoffChannel::create(name("h-2"), dir.path()).unwrap();
        let socket_file = unix::endpoint_path(channel.name(), dir.path());
        assert!(socket_file.exists());

        let started = std::time::Instant::now();
        let err = channel
            .await_connection(std::process::id(), Duration::from_millis(100))
            .await
            .unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, HandoffError::ChannelTimeout { timeout_ms: 100, .. }));
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_secs(2));
        assert_eq!(channel.state(), ChannelState::Failed);
        assert!(!socket_file.exists());

        channel.close();
        assert_eq!(channel.state(), ChannelState::Closed);
    }

    #[tokio::test]
    async fn test_peer_other_than_worker_gets_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut worker = tokio::process::Command::new("sleep").arg("30").spawn().unwrap();
        let worker_pid = worker.id().unwrap();

        let mut channel = HandoffChannel::create(name("h-5"), dir.path()).unwrap();
        let socket_file = unix::endpoint_path(channel.name(), dir.path());

        let dir_path = dir.path().to_path_buf();
        let intruder = tokio::spawn(async move {
            let mut client = ChannelClient::connect(name("h-5"), &dir_path, Duration::from_secs(2))
                .await
                .unwrap();
            client.receive(Duration::from_secs(2)).await
        });

        let err = channel
            .await_connection(worker_pid, Duration::from_millis(300))
            .await
            .unwrap_err();
        assert!(matches!(err, HandoffError::ChannelTimeout { .. }));
        assert_eq!(channel.state(), ChannelState::Failed);
        assert!(!socket_file.exists());

        // The foreign peer was disconnected without a frame.
        let received = intruder.await.unwrap();
        assert!(matches!(received, Err(HandoffError::Transfer(_))));

        worker.kill().await.unwrap();
    }

    #[tokio::test]
    async fn test_send_before_connect_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut channel = HandoffChannel::create(name("h-3"), dir.path()).unwrap();
        let token = DuplicationToken::issue(DuplicationStrategy::Inherited, 1, Vec::new());

        let err = channel.send(3, token).await.unwrap_err();
        assert!(matches!(err, HandoffError::InvalidChannelState { .. }));
    }

    #[tokio::test]
    async fn test_drop_removes_socket_file() {
        let dir = tempfile::tempdir().unwrap();
        let channel = HandoffChannel::create(name("h-4"), dir.path()).unwrap();
        let socket_file = unix::endpoint_path(channel.name(), dir.path());
        assert!(socket_file.exists());

        drop(channel);
        assert!(!socket_file.exists());
    }

    #[tokio::test]
    async fn test_close_tolerates_removed_socket_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut channel = HandoffChannel::create(name("h-6"), dir.path()).unwrap();
        std::fs::remove_file(unix::endpoint_path(channel.name(), dir.path())).unwrap();

        channel.close();
        assert_eq!(channel.state(), ChannelState::Closed);
        channel.close();
        assert_eq!(channel.state(), ChannelState::Closed);
    }

    #[tokio::test]
    async fn test_client_connect_times_out_without_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let err = ChannelClient::connect(name("absent"), dir.path(), Duration::from_millis(60))
            .await
            .unwrap_err();
        assert!(matches!(err, HandoffError::ChannelTimeout { .. }));
    }

    #[tokio::test]
    async fn test_client_waits_for_late_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let dir_path = dir.path().to_path_buf();
        let client = tokio::spawn(async move {
            ChannelClient::connect(name("late"), &dir_path, Duration::from_secs(2)).await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        let mut channel = HandoffChannel::create(name("late"), dir.path()).unwrap();
        channel
            .await_connection(std::process::id(), Duration::from_secs(2))
            .await
            .unwrap();
        assert!(client.await.unwrap().is_ok());
    }
}
