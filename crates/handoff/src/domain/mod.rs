//! Domain layer: connection, token, channel and worker types
//!
//! Pure types with no protocol I/O of their own.

pub mod channel;
pub mod config;
pub mod connection;
pub mod token;
pub mod wire;
pub mod worker;

pub use channel::{ChannelName, ChannelNamer, ChannelState};
pub use config::{HandoffConfig, StrategyChoice};
pub use connection::{ConnectionHandle, RawHandleValue};
pub use token::{DuplicationStrategy, DuplicationToken, TokenId, TokenLedger};
pub use wire::{encode_frame, FramePrefix, WireError, FRAME_PREFIX_LEN};
pub use worker::{exit_code_of, WorkerCommand, WorkerExit, WorkerProcess, WorkerState};
