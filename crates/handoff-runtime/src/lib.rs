//! # Handoff Runtime
//!
//! Wiring for the `handoffd` binary.
//!
//! ## Modular Structure
//!
//! - `config` - `RuntimeConfig` from TOML, environment and CLI flags
//! - `adapters/` - Prometheus implementation of the core metrics port
//! - `echo` - the `ConnectionService` workers run
//! - `server` - listener, accept loop, worker supervisor and shutdown
//!
//! ## Startup Sequence
//!
//! 1. Load configuration (file, then environment, then flags)
//! 2. Initialize logging and metrics
//! 3. Bind the listening socket and select the duplication strategy
//! 4. Start the worker supervisor
//! 5. Run the accept loop until Ctrl-C
//! 6. Kill and reap every remaining worker

pub mod adapters;
pub mod config;
pub mod echo;
pub mod server;

pub use adapters::PrometheusMetrics;
pub use config::{ConfigError, ListenerConfig, RuntimeConfig, ServeConfig, WorkerConfig};
pub use echo::EchoService;
pub use server::{serve, supervise};
