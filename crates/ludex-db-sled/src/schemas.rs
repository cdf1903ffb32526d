//! Tree names and record codecs.

use borsh::{BorshDeserialize, BorshSerialize};
use ludex_db::{DbError, DbResult};

/// Tree holding the single checkpoint record.
pub(crate) const CURRENT_TREE: &str = "engine_current";

/// Tree mapping block hash to [`UndoRecord`].
pub(crate) const UNDO_TREE: &str = "engine_undo";

/// Index tree mapping `height_be ++ hash` to nothing, for range pruning.
pub(crate) const UNDO_HEIGHT_TREE: &str = "engine_undo_height";

/// The one key used in [`CURRENT_TREE`].
pub(crate) const CURRENT_KEY: &[u8] = b"current";

#[derive(BorshSerialize, BorshDeserialize)]
pub(crate) struct CheckpointRecord {
    pub hash: [u8; 32],
    pub state: Vec<u8>,
}

#[derive(BorshSerialize, BorshDeserialize)]
pub(crate) struct UndoRecord {
    pub height: u32,
    pub data: Vec<u8>,
}

pub(crate) fn encode<T: BorshSerialize>(value: &T) -> DbResult<Vec<u8>> {
    borsh::to_vec(value).map_err(|e| DbError::Other(format!("borsh encode: {e}")))
}

pub(crate) fn decode<T: BorshDeserialize>(bytes: &[u8]) -> DbResult<T> {
    T::try_from_slice(bytes).map_err(|e| DbError::CorruptedData(e.to_string()))
}

/// Key in the height index: big-endian height so lexicographic order is
/// height order, then the hash for uniqueness.
pub(crate) fn height_key(height: u32, hash: &[u8; 32]) -> [u8; 36] {
    let mut key = [0u8; 36];
    key[..4].copy_from_slice(&height.to_be_bytes());
    key[4..].copy_from_slice(hash);
    key
}
