//! Core identifier and block types shared across the ludex engine.

mod block;
mod chain;
mod errors;
mod hash;
mod state;

pub use block::{Block, BlockRef, MoveRecord};
pub use chain::Chain;
pub use errors::CodecError;
pub use hash::BlockHash;
pub use state::{GameStateData, UndoData};
