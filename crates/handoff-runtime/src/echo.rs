//! Echo service run by workers.
//!
//! Every chunk the peer sends is written straight back. The connection ends
//! when the peer closes its side or stays silent for the read timeout.

use std::time::Duration;

use async_trait::async_trait;
use handoff::{
    read_with_deadline, write_all, ConnectionHandle, ConnectionService, HandoffError, ReadOutcome,
};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct EchoService {
    read_timeout: Duration,
    max_read: usize,
}

impl EchoService {
    pub fn new(read_timeout: Duration, max_read: usize) -> Self {
        Self {
            read_timeout,
            max_read,
        }
    }
}

fn io_failure(context: &str, e: std::io::Error) -> HandoffError {
    HandoffError::Transfer(format!("{context}: {e}"))
}

#[async_trait]
impl ConnectionService for EchoService {
    async fn serve(&self, conn: ConnectionHandle) -> Result<u64, HandoffError> {
        let peer = conn.peer_ip();
        let mut stream = conn
            .into_tokio()
            .map_err(|e| io_failure("registering connection", e))?;

        let mut served = 0u64;
        loop {
            match read_with_deadline(&mut stream, self.max_read, self.read_timeout)
                .await
                .map_err(|e| io_failure("reading from peer", e))?
            {
                ReadOutcome::Data(bytes) => {
                    let written = write_all(&mut stream, &bytes)
                        .await
                        .map_err(|e| io_failure("writing to peer", e))?;
                    served += written as u64;
                }
                ReadOutcome::Eof => {
                    debug!(peer = %peer, served, "peer closed connection");
                    break;
                }
                ReadOutcome::Timeout => {
                    debug!(peer = %peer, served, "peer idle, closing connection");
                    break;
                }
            }
        }
        Ok(served)
    }
}
