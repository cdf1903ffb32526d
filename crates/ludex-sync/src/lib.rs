//! The synchronizer: a state machine that reconciles the local game state
//! with the remote chain.
//!
//! One blocking worker task owns the machine and is the sole storage
//! writer.  Tip notifications from the upstream drive forward and
//! backward block transitions, each one its own storage transaction.

mod config;
mod errors;
mod shutdown;
mod worker;

pub use config::SyncConfig;
pub use errors::SyncError;
pub use shutdown::{ShutdownGuard, ShutdownSignal};
pub use worker::{worker_task, WorkerState};
