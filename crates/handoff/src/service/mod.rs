//! Service Layer
//!
//! - `HandoffOrchestrator`: parent side of one handoff
//! - `AcceptLoop`: accept, dispatch, shutdown
//! - `WorkerRegistry`: live worker table
//! - `worker`: receiving side run inside the spawned process

pub mod accept_loop;
pub mod orchestrator;
pub mod registry;
pub mod worker;


pub use accept_loop::{AcceptLoop, AcceptStats};
pub use orchestrator::HandoffOrchestrator;
pub use registry::{WorkerRegistry, DEFAULT_POLL_INTERVAL};
pub use worker::{
    exit_code_for, receive_connection, run_worker, WorkerOptions, EXIT_FAILURE, EXIT_OK,
    EXIT_RECONSTRUCTION,
};
