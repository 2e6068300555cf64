//! Inbound Ports (Driving Ports)
//!
//! The API the accept loop drives, and the API a worker implements to serve
//! the connection it received.

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{ChannelName, ConnectionHandle, DuplicationStrategy, TokenId};
use crate::error::HandoffError;

/// Outcome of a completed handoff.
#[derive(Clone, Debug)]
pub struct HandoffReport {
    pub worker_pid: u32,
    pub channel: ChannelName,
    pub token: TokenId,
    pub strategy: DuplicationStrategy,
    /// Peer IP of the handed-off connection, empty when unknown
    pub peer: String,
    pub elapsed: Duration,
}

/// Hand a connection to a new worker (Driving Port)
#[async_trait]
pub trait HandoffApi: Send + Sync {
    /// Transfer `conn` to a freshly spawned, registered worker.
    ///
    /// On success this process no longer holds the connection.
    async fn handoff(&self, conn: ConnectionHandle) -> Result<HandoffReport, HandoffError>;
}

/// Serves one received connection inside a worker (Driving Port)
#[async_trait]
pub trait ConnectionService: Send + Sync {
    /// Serve `conn` until the peer is done; returns bytes served.
    async fn serve(&self, conn: ConnectionHandle) -> Result<u64, HandoffError>;
}
