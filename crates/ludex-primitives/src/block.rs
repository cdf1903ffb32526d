use std::fmt;

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::BlockHash;

/// Position of a block in the upstream chain.
///
/// The height is advisory; `parent` is what reorg detection relies on.
#[derive(
    Copy, Clone, Eq, PartialEq, Hash, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct BlockRef {
    pub height: u32,
    pub hash: BlockHash,
    pub parent: BlockHash,
}

impl BlockRef {
    pub fn new(height: u32, hash: BlockHash, parent: BlockHash) -> Self {
        Self {
            height,
            hash,
            parent,
        }
    }
}

impl fmt::Display for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.hash.to_hex();
        write!(f, "{}@{}..{}", self.height, &hex[..4], &hex[60..])
    }
}

impl fmt::Debug for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BlockRef(height={}, hash={}, parent={})",
            self.height, self.hash, self.parent
        )
    }
}

/// One move addressed to the game in some block.
///
/// The engine does not interpret the payload; it is handed to the rules
/// verbatim.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct MoveRecord {
    /// Sending player name.
    pub name: String,

    /// Opaque move payload.
    #[serde(rename = "move")]
    pub mv: serde_json::Value,
}

/// Block content as delivered by the upstream daemon.
///
/// Moves are delivered to the rules in the order they appear here (the
/// upstream's order within the block); rules are free to reorder
/// internally.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// The block's position in the chain.
    pub reference: BlockRef,

    /// Moves addressed to this game, in block order.
    pub moves: Vec<MoveRecord>,

    /// Remaining upstream-supplied block data, passed through untouched.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Block {
    pub fn new(reference: BlockRef, moves: Vec<MoveRecord>) -> Self {
        Self {
            reference,
            moves,
            payload: serde_json::Value::Null,
        }
    }

    pub fn hash(&self) -> BlockHash {
        self.reference.hash
    }

    pub fn parent(&self) -> BlockHash {
        self.reference.parent
    }

    pub fn height(&self) -> u32 {
        self.reference.height
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blockref_display() {
        let hash = BlockHash::from_hex(
            "37ad61cff1367467a98cf7c54c4ac99e989f1fbb1bc1e646235e90c065c565ba",
        )
        .unwrap();
        let r = BlockRef::new(11, hash, BlockHash::zero());
        assert_eq!(r.to_string(), "11@37ad..65ba");
    }

    #[test]
    fn test_move_record_json_shape() {
        let m: MoveRecord =
            serde_json::from_str(r#"{"name":"domob","move":["new"]}"#).unwrap();
        assert_eq!(m.name, "domob");
        assert_eq!(m.mv, serde_json::json!(["new"]));
        let back = serde_json::to_value(&m).unwrap();
        assert_eq!(back, serde_json::json!({"name":"domob","move":["new"]}));
    }
}
