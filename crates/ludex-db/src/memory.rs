//! Volatile in-memory driver.
//!
//! Transactions are snapshot-based: `begin_transaction` clones the
//! committed map, writes mutate the live copy, rollback restores the
//! snapshot.  Cheap enough for the state sizes this driver is meant for
//! (tests and throwaway runs).

use std::collections::BTreeMap;

use ludex_primitives::{BlockHash, GameStateData, UndoData};
use parking_lot::Mutex;

use crate::{DbError, DbResult, Storage};

#[derive(Clone, Default)]
struct StateMap {
    current: Option<(BlockHash, GameStateData)>,
    undo: BTreeMap<BlockHash, (u32, UndoData)>,
}

#[derive(Default)]
struct MemInner {
    live: StateMap,
    /// Pre-transaction image; `Some` exactly while a transaction is open.
    snapshot: Option<StateMap>,
}

/// Volatile [`Storage`] driver.
#[derive(Default)]
pub struct MemoryStorage {
    inner: Mutex<MemInner>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStorage").finish_non_exhaustive()
    }
}

impl Storage for MemoryStorage {
    fn begin_transaction(&self) -> DbResult<()> {
        let mut inner = self.inner.lock();
        if inner.snapshot.is_some() {
            return Err(DbError::TransactionAlreadyOpen);
        }
        inner.snapshot = Some(inner.live.clone());
        Ok(())
    }

    fn commit_transaction(&self) -> DbResult<()> {
        let mut inner = self.inner.lock();
        if inner.snapshot.take().is_none() {
            return Err(DbError::NoTransaction);
        }
        Ok(())
    }

    fn rollback_transaction(&self) -> DbResult<()> {
        let mut inner = self.inner.lock();
        match inner.snapshot.take() {
            Some(snap) => {
                inner.live = snap;
                Ok(())
            }
            None => Err(DbError::NoTransaction),
        }
    }

    fn get_current_state(&self) -> DbResult<Option<(BlockHash, GameStateData)>> {
        Ok(self.inner.lock().live.current.clone())
    }

    fn set_current_state(&self, hash: BlockHash, state: &GameStateData) -> DbResult<()> {
        let mut inner = self.inner.lock();
        if inner.snapshot.is_none() {
            return Err(DbError::NoTransaction);
        }
        inner.live.current = Some((hash, state.clone()));
        Ok(())
    }

    fn store_undo(&self, hash: BlockHash, height: u32, undo: &UndoData) -> DbResult<()> {
        let mut inner = self.inner.lock();
        if inner.snapshot.is_none() {
            return Err(DbError::NoTransaction);
        }
        inner.live.undo.insert(hash, (height, undo.clone()));
        Ok(())
    }

    fn get_undo(&self, hash: &BlockHash) -> DbResult<Option<UndoData>> {
        Ok(self
            .inner
            .lock()
            .live
            .undo
            .get(hash)
            .map(|(_, undo)| undo.clone()))
    }

    fn delete_undo(&self, hash: &BlockHash) -> DbResult<()> {
        let mut inner = self.inner.lock();
        if inner.snapshot.is_none() {
            return Err(DbError::NoTransaction);
        }
        inner.live.undo.remove(hash);
        Ok(())
    }

    fn prune_undo_up_to(&self, height: u32) -> DbResult<()> {
        let mut inner = self.inner.lock();
        if inner.snapshot.is_none() {
            return Err(DbError::NoTransaction);
        }
        inner.live.undo.retain(|_, (h, _)| *h > height);
        Ok(())
    }

    fn clear(&self) -> DbResult<()> {
        let mut inner = self.inner.lock();
        if inner.snapshot.is_none() {
            return Err(DbError::NoTransaction);
        }
        inner.live = StateMap::default();
        Ok(())
    }
}

// The generic storage-contract suite in `ludex-db-tests` can't be stamped
// onto `MemoryStorage` here: that crate depends on `ludex-db`, so using it
// from `ludex-db`'s own unit tests would build two distinct copies of this
// crate (one under `#[cfg(test)]`, one as `ludex-db-tests`'s normal
// dependency), and `MemoryStorage` would only implement the `Storage` trait
// of the former. The suite is inlined below instead, verbatim, so it still
// runs against `MemoryStorage` and is stamped as-is onto every other driver
// via `storage_contract_tests!` in their own crates.
#[cfg(test)]
mod tests {
    use super::*;

    fn hash(n: u8) -> BlockHash {
        BlockHash::new([n; 32])
    }

    fn state(s: &str) -> GameStateData {
        GameStateData::from(s)
    }

    fn undo(s: &str) -> UndoData {
        UndoData::from(s.as_bytes())
    }

    #[test]
    fn test_contract_virgin_store() {
        let store = MemoryStorage::new();
        assert!(store.get_current_state().unwrap().is_none());
        assert!(store.get_undo(&hash(1)).unwrap().is_none());
    }

    #[test]
    fn test_contract_current_state_roundtrip() {
        let store = MemoryStorage::new();
        store.begin_transaction().unwrap();
        store.set_current_state(hash(1), &state("one")).unwrap();
        store.commit_transaction().unwrap();

        let (h, s) = store.get_current_state().unwrap().unwrap();
        assert_eq!(h, hash(1));
        assert_eq!(s, state("one"));

        // Overwrite wins.
        store.begin_transaction().unwrap();
        store.set_current_state(hash(2), &state("two")).unwrap();
        store.commit_transaction().unwrap();

        let (h, s) = store.get_current_state().unwrap().unwrap();
        assert_eq!(h, hash(2));
        assert_eq!(s, state("two"));
    }

    #[test]
    fn test_contract_writes_require_transaction() {
        let store = MemoryStorage::new();
        assert!(matches!(
            store.set_current_state(hash(1), &state("x")),
            Err(DbError::NoTransaction)
        ));
        assert!(matches!(
            store.store_undo(hash(1), 1, &undo("x")),
            Err(DbError::NoTransaction)
        ));
        assert!(matches!(
            store.delete_undo(&hash(1)),
            Err(DbError::NoTransaction)
        ));
        assert!(matches!(
            store.commit_transaction(),
            Err(DbError::NoTransaction)
        ));
        assert!(matches!(
            store.rollback_transaction(),
            Err(DbError::NoTransaction)
        ));
    }

    #[test]
    fn test_contract_one_transaction_at_a_time() {
        let store = MemoryStorage::new();
        store.begin_transaction().unwrap();
        assert!(matches!(
            store.begin_transaction(),
            Err(DbError::TransactionAlreadyOpen)
        ));
        store.rollback_transaction().unwrap();
        store.begin_transaction().unwrap();
        store.commit_transaction().unwrap();
    }

    #[test]
    fn test_contract_reads_observe_own_writes() {
        let store = MemoryStorage::new();
        store.begin_transaction().unwrap();
        store.set_current_state(hash(1), &state("staged")).unwrap();
        store.store_undo(hash(1), 11, &undo("u1")).unwrap();

        let (h, s) = store.get_current_state().unwrap().unwrap();
        assert_eq!(h, hash(1));
        assert_eq!(s, state("staged"));
        assert_eq!(store.get_undo(&hash(1)).unwrap().unwrap(), undo("u1"));

        store.delete_undo(&hash(1)).unwrap();
        assert!(store.get_undo(&hash(1)).unwrap().is_none());

        store.rollback_transaction().unwrap();
    }

    #[test]
    fn test_contract_rollback_is_atomic() {
        let store = MemoryStorage::new();
        store.begin_transaction().unwrap();
        store.set_current_state(hash(1), &state("one")).unwrap();
        store.store_undo(hash(1), 11, &undo("u1")).unwrap();
        store.commit_transaction().unwrap();

        store.begin_transaction().unwrap();
        store.set_current_state(hash(2), &state("two")).unwrap();
        store.store_undo(hash(2), 12, &undo("u2")).unwrap();
        store.delete_undo(&hash(1)).unwrap();
        store.rollback_transaction().unwrap();

        let (h, s) = store.get_current_state().unwrap().unwrap();
        assert_eq!(h, hash(1));
        assert_eq!(s, state("one"));
        assert_eq!(store.get_undo(&hash(1)).unwrap().unwrap(), undo("u1"));
        assert!(store.get_undo(&hash(2)).unwrap().is_none());
    }

    #[test]
    fn test_contract_delete_undo_idempotent() {
        let store = MemoryStorage::new();
        store.begin_transaction().unwrap();
        store.store_undo(hash(1), 11, &undo("u1")).unwrap();
        store.commit_transaction().unwrap();

        store.begin_transaction().unwrap();
        store.delete_undo(&hash(1)).unwrap();
        store.delete_undo(&hash(1)).unwrap();
        store.delete_undo(&hash(9)).unwrap();
        store.commit_transaction().unwrap();

        assert!(store.get_undo(&hash(1)).unwrap().is_none());
    }

    #[test]
    fn test_contract_store_undo_replaces() {
        let store = MemoryStorage::new();
        store.begin_transaction().unwrap();
        store.store_undo(hash(1), 11, &undo("old")).unwrap();
        store.commit_transaction().unwrap();

        store.begin_transaction().unwrap();
        store.store_undo(hash(1), 13, &undo("new")).unwrap();
        store.commit_transaction().unwrap();

        assert_eq!(store.get_undo(&hash(1)).unwrap().unwrap(), undo("new"));

        // The entry now lives at height 13; pruning through 12 must keep it.
        store.begin_transaction().unwrap();
        store.prune_undo_up_to(12).unwrap();
        store.commit_transaction().unwrap();
        assert!(store.get_undo(&hash(1)).unwrap().is_some());
    }

    #[test]
    fn test_contract_prune_undo_up_to() {
        let store = MemoryStorage::new();
        store.begin_transaction().unwrap();
        for n in 1..=5u8 {
            store
                .store_undo(hash(n), 10 + n as u32, &undo(&format!("u{n}")))
                .unwrap();
        }
        store.commit_transaction().unwrap();

        store.begin_transaction().unwrap();
        store.prune_undo_up_to(13).unwrap();
        store.commit_transaction().unwrap();

        for n in 1..=3u8 {
            assert!(store.get_undo(&hash(n)).unwrap().is_none());
        }
        for n in 4..=5u8 {
            assert!(store.get_undo(&hash(n)).unwrap().is_some());
        }
    }

    #[test]
    fn test_contract_prune_leaves_current_untouched() {
        let store = MemoryStorage::new();
        store.begin_transaction().unwrap();
        store.set_current_state(hash(5), &state("tip")).unwrap();
        store.store_undo(hash(5), 15, &undo("u5")).unwrap();
        store.commit_transaction().unwrap();

        store.begin_transaction().unwrap();
        store.prune_undo_up_to(14).unwrap();
        store.commit_transaction().unwrap();

        let (h, s) = store.get_current_state().unwrap().unwrap();
        assert_eq!(h, hash(5));
        assert_eq!(s, state("tip"));
        assert!(store.get_undo(&hash(5)).unwrap().is_some());
    }

    #[test]
    fn test_contract_clear_resets_to_virgin() {
        let store = MemoryStorage::new();
        store.begin_transaction().unwrap();
        store.set_current_state(hash(1), &state("one")).unwrap();
        store.store_undo(hash(1), 11, &undo("u1")).unwrap();
        store.commit_transaction().unwrap();

        store.begin_transaction().unwrap();
        store.clear().unwrap();
        store.commit_transaction().unwrap();

        assert!(store.get_current_state().unwrap().is_none());
        assert!(store.get_undo(&hash(1)).unwrap().is_none());
    }
}
