//! Shared fixtures for sync and engine tests: a scriptable mock upstream
//! and a simple chat game over an opaque JSON state blob.

mod chat;
mod mock_upstream;

use ludex_primitives::{Block, BlockHash, BlockRef, MoveRecord};

pub use chat::{ChatRules, CHAT_GENESIS_HEIGHT};
pub use mock_upstream::MockUpstream;

/// Deterministic test block hash, distinct per `n`.
pub fn test_hash(n: u32) -> BlockHash {
    let mut bytes = [0u8; 32];
    bytes[..4].copy_from_slice(&n.to_be_bytes());
    bytes[31] = 0x7f;
    BlockHash::new(bytes)
}

/// Block whose hash is derived from its height.
pub fn block_at(height: u32, parent: BlockHash, moves: Vec<MoveRecord>) -> Block {
    block_with(test_hash(height), height, parent, moves)
}

/// Block with an explicit hash, for same-height reorg forks.
pub fn block_with(
    hash: BlockHash,
    height: u32,
    parent: BlockHash,
    moves: Vec<MoveRecord>,
) -> Block {
    Block::new(BlockRef::new(height, hash, parent), moves)
}

/// One move record in the upstream wire shape.
pub fn chat_move(name: &str, entries: &[&str]) -> MoveRecord {
    MoveRecord {
        name: name.to_owned(),
        mv: serde_json::json!(entries),
    }
}
