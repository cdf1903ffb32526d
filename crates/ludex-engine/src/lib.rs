//! The game daemon: wires rules, storage, the synchronizer and the RPC
//! surface into one long-running engine.

mod config;
mod engine;
mod rpc;

pub use config::{ConfigError, EngineConfig, RpcSurface, StorageBackend};
pub use engine::{default_main, default_main_sqlite, init_logging, Engine};
pub use rpc::RpcTip;
