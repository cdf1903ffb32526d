use std::{collections::BTreeMap, fs, path::Path};

use anyhow::Context;
use ludex_db::{DbError, DbResult, Storage};
use ludex_primitives::{BlockHash, GameStateData, UndoData};
use parking_lot::Mutex;
use sled::{transaction::ConflictableTransactionError, Transactional, Tree};

use crate::schemas::{
    decode, encode, height_key, CheckpointRecord, UndoRecord, CURRENT_KEY, CURRENT_TREE,
    UNDO_HEIGHT_TREE, UNDO_TREE,
};

/// Staged writes of the open transaction.
///
/// `current`: `Some(x)` means the checkpoint was overwritten with `x`
/// (where `x = None` stages a reset to virgin).  `undo`: per-hash staged
/// insert (`Some`) or delete (`None`).  Pruning is expanded into per-hash
/// deletes at staging time so reads stay exact.
#[derive(Default)]
struct Pending {
    current: Option<Option<(BlockHash, GameStateData)>>,
    undo: BTreeMap<BlockHash, Option<(u32, UndoData)>>,
    clear_all_undo: bool,
}

/// On-disk [`Storage`] driver backed by sled.
pub struct SledStorage {
    #[allow(dead_code)]
    db: sled::Db,
    current_tree: Tree,
    undo_tree: Tree,
    height_tree: Tree,
    pending: Mutex<Option<Pending>>,
}

impl std::fmt::Debug for SledStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledStorage").finish_non_exhaustive()
    }
}

/// Opens (creating as needed) the sled database under `datadir/sled`.
pub fn open_sled_storage(datadir: &Path) -> anyhow::Result<SledStorage> {
    let mut dir = datadir.to_path_buf();
    dir.push("sled");
    if !dir.exists() {
        fs::create_dir_all(&dir)?;
    }
    let db = sled::open(&dir).context("opening sled database")?;
    SledStorage::new(db).context("opening sled trees")
}

impl SledStorage {
    pub fn new(db: sled::Db) -> anyhow::Result<Self> {
        let current_tree = db.open_tree(CURRENT_TREE)?;
        let undo_tree = db.open_tree(UNDO_TREE)?;
        let height_tree = db.open_tree(UNDO_HEIGHT_TREE)?;
        Ok(Self {
            db,
            current_tree,
            undo_tree,
            height_tree,
            pending: Mutex::new(None),
        })
    }

    fn read_committed_undo(&self, hash: &BlockHash) -> DbResult<Option<(u32, UndoData)>> {
        let Some(raw) = self
            .undo_tree
            .get(hash.as_bytes())
            .map_err(sled_err)?
        else {
            return Ok(None);
        };
        let rec: UndoRecord = decode(&raw)?;
        Ok(Some((rec.height, UndoData::new(rec.data))))
    }

    /// Hashes of committed undo entries with height ≤ `height`.
    fn committed_hashes_up_to(&self, height: u32) -> DbResult<Vec<(u32, BlockHash)>> {
        let end = height_key(height, &[0xff; 32]);
        let mut out = Vec::new();
        for item in self.height_tree.range(..=end.as_slice()) {
            let (key, _) = item.map_err(sled_err)?;
            if key.len() != 36 {
                return Err(DbError::CorruptedData("undo height key length".into()));
            }
            let mut h = [0u8; 4];
            h.copy_from_slice(&key[..4]);
            let mut hash = [0u8; 32];
            hash.copy_from_slice(&key[4..]);
            out.push((u32::from_be_bytes(h), BlockHash::new(hash)));
        }
        Ok(out)
    }

    fn apply_pending(&self, pending: Pending) -> DbResult<()> {
        // A staged full reset drops every committed undo entry; collect
        // them up front so the transaction closure only writes.
        let mut reset_list = Vec::new();
        if pending.clear_all_undo {
            for item in self.undo_tree.iter() {
                let (key, raw) = item.map_err(sled_err)?;
                let rec: UndoRecord = decode(&raw)?;
                let mut hash = [0u8; 32];
                if key.len() != 32 {
                    return Err(DbError::CorruptedData("undo key length".into()));
                }
                hash.copy_from_slice(&key);
                reset_list.push((hash, rec.height));
            }
        }

        let res = (&self.current_tree, &self.undo_tree, &self.height_tree).transaction(
            |(cur, undo, heights)| {
                for (hash, height) in &reset_list {
                    undo.remove(&hash[..])?;
                    heights.remove(&height_key(*height, hash)[..])?;
                }

                if let Some(staged) = &pending.current {
                    match staged {
                        Some((hash, state)) => {
                            let rec = CheckpointRecord {
                                hash: *hash.as_bytes(),
                                state: state.as_bytes().to_vec(),
                            };
                            cur.insert(CURRENT_KEY, encode(&rec).map_err(tx_abort)?)?;
                        }
                        None => {
                            cur.remove(CURRENT_KEY)?;
                        }
                    }
                }

                for (hash, op) in &pending.undo {
                    // Drop a stale height-index entry when replacing or
                    // deleting an existing record.
                    if let Some(raw) = undo.get(hash.as_bytes())? {
                        let old: UndoRecord = decode(&raw).map_err(tx_abort)?;
                        heights.remove(&height_key(old.height, hash.as_bytes())[..])?;
                    }
                    match op {
                        Some((height, data)) => {
                            let rec = UndoRecord {
                                height: *height,
                                data: data.as_bytes().to_vec(),
                            };
                            undo.insert(&hash.as_bytes()[..], encode(&rec).map_err(tx_abort)?)?;
                            heights.insert(
                                &height_key(*height, hash.as_bytes())[..],
                                &[] as &[u8],
                            )?;
                        }
                        None => {
                            undo.remove(&hash.as_bytes()[..])?;
                        }
                    }
                }

                Ok(())
            },
        );

        match res {
            Ok(()) => {}
            Err(sled::transaction::TransactionError::Abort(e)) => return Err(e),
            Err(sled::transaction::TransactionError::Storage(e)) => return Err(sled_err(e)),
        }

        self.db.flush().map_err(sled_err)?;
        Ok(())
    }
}

fn sled_err(e: sled::Error) -> DbError {
    DbError::Other(format!("sled: {e}"))
}

fn tx_abort(e: DbError) -> ConflictableTransactionError<DbError> {
    ConflictableTransactionError::Abort(e)
}

impl Storage for SledStorage {
    fn begin_transaction(&self) -> DbResult<()> {
        let mut pending = self.pending.lock();
        if pending.is_some() {
            return Err(DbError::TransactionAlreadyOpen);
        }
        *pending = Some(Pending::default());
        Ok(())
    }

    fn commit_transaction(&self) -> DbResult<()> {
        let staged = self
            .pending
            .lock()
            .take()
            .ok_or(DbError::NoTransaction)?;
        self.apply_pending(staged)
    }

    fn rollback_transaction(&self) -> DbResult<()> {
        self.pending
            .lock()
            .take()
            .map(|_| ())
            .ok_or(DbError::NoTransaction)
    }

    fn get_current_state(&self) -> DbResult<Option<(BlockHash, GameStateData)>> {
        if let Some(pending) = self.pending.lock().as_ref() {
            if let Some(staged) = &pending.current {
                return Ok(staged.clone());
            }
        }
        let Some(raw) = self.current_tree.get(CURRENT_KEY).map_err(sled_err)? else {
            return Ok(None);
        };
        let rec: CheckpointRecord = decode(&raw)?;
        Ok(Some((
            BlockHash::new(rec.hash),
            GameStateData::new(rec.state),
        )))
    }

    fn set_current_state(&self, hash: BlockHash, state: &GameStateData) -> DbResult<()> {
        let mut guard = self.pending.lock();
        let pending = guard.as_mut().ok_or(DbError::NoTransaction)?;
        pending.current = Some(Some((hash, state.clone())));
        Ok(())
    }

    fn store_undo(&self, hash: BlockHash, height: u32, undo: &UndoData) -> DbResult<()> {
        let mut guard = self.pending.lock();
        let pending = guard.as_mut().ok_or(DbError::NoTransaction)?;
        pending.undo.insert(hash, Some((height, undo.clone())));
        Ok(())
    }

    fn get_undo(&self, hash: &BlockHash) -> DbResult<Option<UndoData>> {
        if let Some(pending) = self.pending.lock().as_ref() {
            if let Some(op) = pending.undo.get(hash) {
                return Ok(op.as_ref().map(|(_, data)| data.clone()));
            }
            if pending.clear_all_undo {
                return Ok(None);
            }
        }
        Ok(self.read_committed_undo(hash)?.map(|(_, data)| data))
    }

    fn delete_undo(&self, hash: &BlockHash) -> DbResult<()> {
        let mut guard = self.pending.lock();
        let pending = guard.as_mut().ok_or(DbError::NoTransaction)?;
        pending.undo.insert(*hash, None);
        Ok(())
    }

    fn prune_undo_up_to(&self, height: u32) -> DbResult<()> {
        // Expanded into explicit per-hash deletes right away so reads
        // inside the transaction observe the prune.
        let committed = self.committed_hashes_up_to(height)?;
        let mut guard = self.pending.lock();
        let pending = guard.as_mut().ok_or(DbError::NoTransaction)?;
        pending.undo.retain(|_, op| match op {
            Some((h, _)) => *h > height,
            None => true,
        });
        for (_, hash) in committed {
            pending.undo.entry(hash).or_insert(None);
        }
        Ok(())
    }

    fn clear(&self) -> DbResult<()> {
        let mut guard = self.pending.lock();
        let pending = guard.as_mut().ok_or(DbError::NoTransaction)?;
        pending.current = Some(None);
        pending.undo.clear();
        pending.clear_all_undo = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ludex_db_tests::storage_contract_tests;
    use tempfile::TempDir;

    use super::*;

    fn setup() -> SledStorage {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .expect("test: sled");
        SledStorage::new(db).expect("test: trees")
    }

    storage_contract_tests!(setup());

    #[test]
    fn test_persists_across_reopen() {
        let dir = TempDir::new().expect("test: tempdir");

        {
            let store = open_sled_storage(dir.path()).expect("test: open");
            store.begin_transaction().unwrap();
            store
                .set_current_state(BlockHash::new([7; 32]), &GameStateData::from("persisted"))
                .unwrap();
            store
                .store_undo(BlockHash::new([7; 32]), 11, &UndoData::from(&b"u"[..]))
                .unwrap();
            store.commit_transaction().unwrap();
        }

        let store = open_sled_storage(dir.path()).expect("test: reopen");
        let (hash, state) = store.get_current_state().unwrap().unwrap();
        assert_eq!(hash, BlockHash::new([7; 32]));
        assert_eq!(state, GameStateData::from("persisted"));
        assert!(store.get_undo(&BlockHash::new([7; 32])).unwrap().is_some());
    }

    #[test]
    fn test_prune_respects_staged_inserts() {
        let store = setup();

        store.begin_transaction().unwrap();
        store
            .store_undo(BlockHash::new([1; 32]), 10, &UndoData::from(&b"a"[..]))
            .unwrap();
        store
            .store_undo(BlockHash::new([2; 32]), 12, &UndoData::from(&b"b"[..]))
            .unwrap();
        store.prune_undo_up_to(11).unwrap();

        assert!(store.get_undo(&BlockHash::new([1; 32])).unwrap().is_none());
        assert!(store.get_undo(&BlockHash::new([2; 32])).unwrap().is_some());
        store.commit_transaction().unwrap();

        assert!(store.get_undo(&BlockHash::new([1; 32])).unwrap().is_none());
        assert!(store.get_undo(&BlockHash::new([2; 32])).unwrap().is_some());
    }
}
