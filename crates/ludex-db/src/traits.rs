//! Trait definition for the low level storage interface.  Blocking
//! calls, `DbResult` everywhere, no validation at this level.

use std::sync::Arc;

use ludex_primitives::{BlockHash, GameStateData, UndoData};

use crate::DbResult;

/// Persistence capability for the engine's checkpoint and undo log.
///
/// Writes are only valid inside a transaction; at most one transaction may
/// be outstanding per instance.  Reads work inside or outside a
/// transaction and observe the transaction's own writes.  Any error aborts
/// the transaction from the engine's point of view.
pub trait Storage: Send + Sync + 'static {
    /// Opens a write transaction.
    fn begin_transaction(&self) -> DbResult<()>;

    /// Commits the open transaction, making all staged writes visible
    /// atomically.
    fn commit_transaction(&self) -> DbResult<()>;

    /// Discards the open transaction; every staged write disappears.
    fn rollback_transaction(&self) -> DbResult<()>;

    /// The current checkpoint, or `None` while the storage is virgin.
    fn get_current_state(&self) -> DbResult<Option<(BlockHash, GameStateData)>>;

    /// Overwrites the checkpoint.
    fn set_current_state(&self, hash: BlockHash, state: &GameStateData) -> DbResult<()>;

    /// Inserts or replaces the undo entry for a block.
    fn store_undo(&self, hash: BlockHash, height: u32, undo: &UndoData) -> DbResult<()>;

    /// Reads an undo entry, if present.
    fn get_undo(&self, hash: &BlockHash) -> DbResult<Option<UndoData>>;

    /// Removes an undo entry.  Idempotent.
    fn delete_undo(&self, hash: &BlockHash) -> DbResult<()>;

    /// Deletes every undo entry recorded at height ≤ `height`.
    fn prune_undo_up_to(&self, height: u32) -> DbResult<()>;

    /// Resets the storage to the virgin state (no checkpoint, empty undo
    /// log).  Only used on explicit re-initialization.
    fn clear(&self) -> DbResult<()>;
}

impl<S: Storage + ?Sized> Storage for Arc<S> {
    fn begin_transaction(&self) -> DbResult<()> {
        (**self).begin_transaction()
    }

    fn commit_transaction(&self) -> DbResult<()> {
        (**self).commit_transaction()
    }

    fn rollback_transaction(&self) -> DbResult<()> {
        (**self).rollback_transaction()
    }

    fn get_current_state(&self) -> DbResult<Option<(BlockHash, GameStateData)>> {
        (**self).get_current_state()
    }

    fn set_current_state(&self, hash: BlockHash, state: &GameStateData) -> DbResult<()> {
        (**self).set_current_state(hash, state)
    }

    fn store_undo(&self, hash: BlockHash, height: u32, undo: &UndoData) -> DbResult<()> {
        (**self).store_undo(hash, height, undo)
    }

    fn get_undo(&self, hash: &BlockHash) -> DbResult<Option<UndoData>> {
        (**self).get_undo(hash)
    }

    fn delete_undo(&self, hash: &BlockHash) -> DbResult<()> {
        (**self).delete_undo(hash)
    }

    fn prune_undo_up_to(&self, height: u32) -> DbResult<()> {
        (**self).prune_undo_up_to(height)
    }

    fn clear(&self) -> DbResult<()> {
        (**self).clear()
    }
}
