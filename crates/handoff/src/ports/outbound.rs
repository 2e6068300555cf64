//! Outbound Ports (Driven Ports)
//!
//! OS capabilities the handoff depends on: making a socket usable in another
//! process, and launching that process.

use crate::domain::{
    ChannelName, ConnectionHandle, DuplicationStrategy, DuplicationToken, RawHandleValue,
    WorkerCommand, WorkerProcess,
};
use crate::error::{HandoffError, ReconstructionError};

/// Everything needed to launch one worker.
#[derive(Clone, Debug)]
pub struct SpawnRequest {
    pub command: WorkerCommand,
    /// Channel the worker connects to, passed through `HANDOFF_CHANNEL`
    pub channel: ChannelName,
    /// Descriptors the child must inherit across exec
    pub inherit: Vec<RawHandleValue>,
}

impl SpawnRequest {
    pub fn new(command: WorkerCommand, channel: ChannelName) -> Self {
        Self {
            command,
            channel,
            inherit: Vec::new(),
        }
    }
}

/// Socket duplication strategy (Driven Port)
///
/// One implementation is selected at startup; the parent calls
/// [`duplicate_for`](Self::duplicate_for) and the worker calls
/// [`reconstruct`](Self::reconstruct).
pub trait SocketDuplicator: Send + Sync {
    fn strategy(&self) -> DuplicationStrategy;

    /// Adjust the spawn request before the worker is launched.
    fn prepare_spawn(&self, conn: &ConnectionHandle, request: &mut SpawnRequest);

    /// Produce a token that lets process `pid` use `conn`.
    ///
    /// Fails for pid 0, for this process's own pid and for processes that
    /// do not exist.
    fn duplicate_for(
        &self,
        conn: &ConnectionHandle,
        pid: u32,
    ) -> Result<DuplicationToken, HandoffError>;

    /// Materialize the connection in the current process.
    ///
    /// Consumes the token; a token id is accepted at most once per process.
    fn reconstruct(
        &self,
        raw: RawHandleValue,
        token: DuplicationToken,
    ) -> Result<ConnectionHandle, ReconstructionError>;
}

/// Worker process launcher (Driven Port)
pub trait WorkerSpawner: Send + Sync {
    /// Launch a worker. The returned process is `Spawning` until it reaches
    /// its channel.
    fn spawn(&self, request: SpawnRequest) -> Result<WorkerProcess, HandoffError>;
}
