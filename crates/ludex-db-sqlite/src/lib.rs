//! Relational table storage for games whose state lives in SQLite.
//!
//! The engine's checkpoint/undo bookkeeping, the rules' own tables and
//! the named id counters all share one connection and one transaction, so
//! a rollback reverts everything as a unit.  Undo entries are compensating
//! SQL captured by triggers while the rules run forward.

mod changelog;
mod game;
mod ids;
mod storage;

pub use game::{SqliteGame, SqliteGameRules};
pub use ids::{IdPool, IdRange};
pub use storage::{open_sqlite_storage, SqliteStorage};
