//! Adapters Layer
//!
//! OS-facing implementations:
//! - `ConnectionListener`: listening TCP socket
//! - `HandoffChannel` / `ChannelClient`: per-handoff Unix socket or named pipe
//! - `InheritedDuplicator` / `ExplicitDuplicator`: `SocketDuplicator` strategies
//! - `ProcessSpawner`: `WorkerSpawner` on `tokio::process`
//! - `read_with_deadline` / `write_all`: bounded stream I/O

pub mod channel;
pub mod duplicator;
pub mod io;
pub mod listener;
pub mod spawner;

pub use channel::{
    channel_from_env, ChannelClient, HandoffChannel, CHANNEL_DIR_ENV, CHANNEL_ENV,
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_TRANSFER_TIMEOUT,
};
pub use duplicator::{current_pid, default_strategy, select_duplicator, ExplicitDuplicator};
#[cfg(unix)]
pub use duplicator::InheritedDuplicator;
pub use io::{read_with_deadline, write_all, ReadOutcome};
pub use listener::{ConnectionListener, DEFAULT_BACKLOG, DEFAULT_BIND_ADDRESS};
pub use spawner::ProcessSpawner;
