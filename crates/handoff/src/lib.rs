//! # Handoff
//!
//! Connection handoff: an accepted TCP connection is transferred from the
//! process owning the listening socket to a freshly spawned worker process,
//! so every connection is served in isolation.
//!
//! ## Architecture
//!
//! This crate follows Hexagonal Architecture (Ports & Adapters):
//!
//! - **Domain Layer** (`domain/`): Pure types, no I/O
//!   - `ConnectionHandle`: owned connection plus its peer address
//!   - `DuplicationToken` / `TokenLedger`: single-use, pid-bound tokens
//!   - `ChannelName` / `ChannelState`: per-handoff channel identity and lifecycle
//!   - `HandoffConfig`: timeouts, channel directory, strategy
//!   - wire frame encoding
//!
//! - **Ports Layer** (`ports/`): Trait definitions
//!   - `HandoffApi`, `ConnectionService`: driving ports
//!   - `SocketDuplicator`, `WorkerSpawner`: driven ports
//!
//! - **Adapters Layer** (`adapters/`): OS implementations
//!   - `ConnectionListener`, `HandoffChannel` / `ChannelClient`
//!   - `InheritedDuplicator` (Unix), `ExplicitDuplicator`
//!   - `ProcessSpawner`
//!
//! - **Service Layer** (`service/`): Orchestration
//!   - `HandoffOrchestrator`: implements `HandoffApi`
//!   - `AcceptLoop`, `WorkerRegistry`, worker-side `run_worker`
//!
//! ## Invariants
//!
//! - After a successful handoff exactly one process (the worker) holds the
//!   connection.
//! - A token is accepted once, and only by the process it was issued for.
//! - A channel is never reused and its endpoint is removed on every path.
//! - A failed handoff never leaves a running or registered worker behind.
//!
//! ## Usage Example
//!
//! ```ignore
//! use handoff::{
//!     select_duplicator, AcceptLoop, ConnectionListener, HandoffConfig,
//!     HandoffOrchestrator, ProcessSpawner, WorkerCommand, WorkerRegistry,
//! };
//! use std::sync::Arc;
//!
//! let config = HandoffConfig::default();
//! let orchestrator = HandoffOrchestrator::new(
//!     config.clone(),
//!     WorkerCommand::new("/usr/local/bin/worker", vec![]),
//!     ProcessSpawner::new(&config.channel_dir),
//!     select_duplicator(config.strategy.requested()),
//!     Arc::new(WorkerRegistry::default()),
//! )?;
//!
//! let listener = ConnectionListener::bind(8080, 30, "0.0.0.0")?;
//! let (_tx, shutdown) = tokio::sync::watch::channel(false);
//! AcceptLoop::new(listener, Arc::new(orchestrator)).run(shutdown).await?;
//! ```

pub mod adapters;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod ports;
pub mod service;

// Re-exports for convenience
pub use adapters::{
    current_pid, default_strategy, read_with_deadline, select_duplicator, write_all,
    ChannelClient, ConnectionListener, ExplicitDuplicator, HandoffChannel, ProcessSpawner,
    ReadOutcome, CHANNEL_DIR_ENV, CHANNEL_ENV, DEFAULT_BACKLOG, DEFAULT_BIND_ADDRESS,
};
#[cfg(unix)]
pub use adapters::InheritedDuplicator;
pub use domain::{
    ChannelName, ChannelState, ConnectionHandle, DuplicationStrategy, DuplicationToken,
    HandoffConfig, RawHandleValue, StrategyChoice, TokenId, WorkerCommand, WorkerExit,
    WorkerProcess, WorkerState,
};
pub use error::{HandoffError, ReconstructionError, RegistryError};
pub use metrics::{Metrics, MetricsRecorder, MetricsSnapshot, NoOpMetrics};
pub use ports::{
    ConnectionService, HandoffApi, HandoffReport, SocketDuplicator, SpawnRequest, WorkerSpawner,
};
pub use service::{
    exit_code_for, receive_connection, run_worker, AcceptLoop, AcceptStats, HandoffOrchestrator,
    WorkerOptions, WorkerRegistry,
};
