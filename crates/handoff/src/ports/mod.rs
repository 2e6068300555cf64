//! Ports Layer
//!
//! Defines the interfaces (traits) for:
//! - Driving Ports (inbound) - handing off and serving connections
//! - Driven Ports (outbound) - OS duplication and process creation

pub mod inbound;
pub mod outbound;

pub use inbound::{ConnectionService, HandoffApi, HandoffReport};
pub use outbound::{SocketDuplicator, SpawnRequest, WorkerSpawner};
