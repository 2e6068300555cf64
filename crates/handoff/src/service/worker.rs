//! # Worker Side
//!
//! Connect to the channel named in the environment, read the single frame,
//! rebuild the connection and serve it.

use std::time::Duration;

use tracing::{debug, info};

use crate::adapters::{select_duplicator, ChannelClient, DEFAULT_CONNECT_TIMEOUT, DEFAULT_TRANSFER_TIMEOUT};
use crate::domain::{ConnectionHandle, DuplicationStrategy};
use crate::error::HandoffError;
use crate::ports::ConnectionService;

/// Exit code for a worker that served its connection.
pub const EXIT_OK: i32 = 0;
/// Exit code for any failure other than reconstruction.
pub const EXIT_FAILURE: i32 = 1;
/// Exit code for a worker that could not rebuild the connection.
pub const EXIT_RECONSTRUCTION: i32 = 2;

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub connect_timeout: Duration,
    pub transfer_timeout: Duration,
    /// Force a duplication strategy instead of following the token.
    pub strategy: Option<DuplicationStrategy>,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            transfer_timeout: DEFAULT_TRANSFER_TIMEOUT,
            strategy: None,
        }
    }
}

/// Receive the handed-off connection for this process.
pub async fn receive_connection(options: &WorkerOptions) -> Result<ConnectionHandle, HandoffError> {
    let mut client = ChannelClient::connect_from_env(options.connect_timeout).await?;
    let (raw, token) = client.receive(options.transfer_timeout).await?;
    debug!(channel = %client.name(), raw, strategy = %token.strategy(), "token received");

    let duplicator = select_duplicator(options.strategy.or(Some(token.strategy())));
    let conn = duplicator.reconstruct(raw, token)?;
    info!(channel = %client.name(), peer = %conn.peer_ip(), "connection received");
    Ok(conn)
}

/// Full worker lifecycle. Returns the bytes served.
pub async fn run_worker(
    service: &dyn ConnectionService,
    options: &WorkerOptions,
) -> Result<u64, HandoffError> {
    let conn = receive_connection(options).await?;
    service.serve(conn).await
}

/// Process exit code for a worker outcome.
pub fn exit_code_for(result: &Result<u64, HandoffError>) -> i32 {
    match result {
        Ok(_) => EXIT_OK,
        Err(HandoffError::Reconstruction(_)) => EXIT_RECONSTRUCTION,
        Err(_) => EXIT_FAILURE,
    }
}
