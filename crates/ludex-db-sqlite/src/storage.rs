use std::path::Path;

use ludex_db::{DbError, DbResult, Storage};
use ludex_primitives::{BlockHash, GameStateData, UndoData};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

/// Engine bookkeeping DDL.  Everything prefixed `engine_` is invisible to
/// the change-capture triggers.
const ENGINE_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS engine_current (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        hash BLOB NOT NULL,
        state BLOB NOT NULL
    );
    CREATE TABLE IF NOT EXISTS engine_undo (
        hash BLOB PRIMARY KEY,
        height INTEGER NOT NULL,
        data BLOB NOT NULL
    );
    CREATE TABLE IF NOT EXISTS engine_changelog (
        seq INTEGER PRIMARY KEY,
        sql TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS engine_meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
";

pub(crate) struct ConnInner {
    pub conn: Connection,
    pub tx_open: bool,
}

/// [`Storage`] driver over a single SQLite connection.
///
/// The connection is shared with the rules in the table-game variant; one
/// SQL transaction spans the engine's `begin_transaction` to
/// `commit_transaction`, covering rule writes as well.
pub struct SqliteStorage {
    inner: Mutex<ConnInner>,
}

impl std::fmt::Debug for SqliteStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStorage").finish_non_exhaustive()
    }
}

/// Opens (creating as needed) the database file under `datadir`.
pub fn open_sqlite_storage(datadir: &Path) -> anyhow::Result<SqliteStorage> {
    let mut file = datadir.to_path_buf();
    file.push("storage.sqlite");
    SqliteStorage::open(&file)
}

impl SqliteStorage {
    /// Opens the database at `path` (`:memory:` works) and installs the
    /// engine schema.  Idempotent on an existing database.
    pub fn open<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        Self::new(conn)
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::new(conn)
    }

    fn new(conn: Connection) -> anyhow::Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(ENGINE_SCHEMA)?;
        Ok(Self {
            inner: Mutex::new(ConnInner {
                conn,
                tx_open: false,
            }),
        })
    }

    /// Runs `f` with the locked connection.  Used by the table-game
    /// adapter so rule SQL shares the engine's transaction.
    pub(crate) fn with_inner<T, E>(
        &self,
        f: impl FnOnce(&mut ConnInner) -> Result<T, E>,
    ) -> Result<T, E> {
        let mut inner = self.inner.lock();
        f(&mut inner)
    }
}

pub(crate) fn sql_err(e: rusqlite::Error) -> DbError {
    DbError::Other(format!("sqlite: {e}"))
}

impl Storage for SqliteStorage {
    fn begin_transaction(&self) -> DbResult<()> {
        self.with_inner(|inner| {
            if inner.tx_open {
                return Err(DbError::TransactionAlreadyOpen);
            }
            inner
                .conn
                .execute_batch("BEGIN IMMEDIATE")
                .map_err(sql_err)?;
            inner.tx_open = true;
            Ok(())
        })
    }

    fn commit_transaction(&self) -> DbResult<()> {
        self.with_inner(|inner| {
            if !inner.tx_open {
                return Err(DbError::NoTransaction);
            }
            inner.conn.execute_batch("COMMIT").map_err(sql_err)?;
            inner.tx_open = false;
            Ok(())
        })
    }

    fn rollback_transaction(&self) -> DbResult<()> {
        self.with_inner(|inner| {
            if !inner.tx_open {
                return Err(DbError::NoTransaction);
            }
            inner.conn.execute_batch("ROLLBACK").map_err(sql_err)?;
            inner.tx_open = false;
            Ok(())
        })
    }

    fn get_current_state(&self) -> DbResult<Option<(BlockHash, GameStateData)>> {
        self.with_inner(|inner| {
            let row = inner
                .conn
                .query_row(
                    "SELECT hash, state FROM engine_current WHERE id = 1",
                    [],
                    |row| {
                        let hash: Vec<u8> = row.get(0)?;
                        let state: Vec<u8> = row.get(1)?;
                        Ok((hash, state))
                    },
                )
                .optional()
                .map_err(sql_err)?;

            match row {
                None => Ok(None),
                Some((hash, state)) => {
                    let hash: [u8; 32] = hash
                        .try_into()
                        .map_err(|_| DbError::CorruptedData("checkpoint hash size".into()))?;
                    Ok(Some((BlockHash::new(hash), GameStateData::new(state))))
                }
            }
        })
    }

    fn set_current_state(&self, hash: BlockHash, state: &GameStateData) -> DbResult<()> {
        self.with_inner(|inner| {
            if !inner.tx_open {
                return Err(DbError::NoTransaction);
            }
            inner
                .conn
                .execute(
                    "INSERT INTO engine_current (id, hash, state) VALUES (1, ?1, ?2)
                     ON CONFLICT (id) DO UPDATE SET hash = excluded.hash, state = excluded.state",
                    params![hash.as_bytes().as_slice(), state.as_bytes()],
                )
                .map_err(sql_err)?;
            Ok(())
        })
    }

    fn store_undo(&self, hash: BlockHash, height: u32, undo: &UndoData) -> DbResult<()> {
        self.with_inner(|inner| {
            if !inner.tx_open {
                return Err(DbError::NoTransaction);
            }
            inner
                .conn
                .execute(
                    "INSERT OR REPLACE INTO engine_undo (hash, height, data) VALUES (?1, ?2, ?3)",
                    params![hash.as_bytes().as_slice(), height, undo.as_bytes()],
                )
                .map_err(sql_err)?;
            Ok(())
        })
    }

    fn get_undo(&self, hash: &BlockHash) -> DbResult<Option<UndoData>> {
        self.with_inner(|inner| {
            let data: Option<Vec<u8>> = inner
                .conn
                .query_row(
                    "SELECT data FROM engine_undo WHERE hash = ?1",
                    params![hash.as_bytes().as_slice()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(sql_err)?;
            Ok(data.map(UndoData::new))
        })
    }

    fn delete_undo(&self, hash: &BlockHash) -> DbResult<()> {
        self.with_inner(|inner| {
            if !inner.tx_open {
                return Err(DbError::NoTransaction);
            }
            inner
                .conn
                .execute(
                    "DELETE FROM engine_undo WHERE hash = ?1",
                    params![hash.as_bytes().as_slice()],
                )
                .map_err(sql_err)?;
            Ok(())
        })
    }

    fn prune_undo_up_to(&self, height: u32) -> DbResult<()> {
        self.with_inner(|inner| {
            if !inner.tx_open {
                return Err(DbError::NoTransaction);
            }
            inner
                .conn
                .execute("DELETE FROM engine_undo WHERE height <= ?1", params![height])
                .map_err(sql_err)?;
            Ok(())
        })
    }

    fn clear(&self) -> DbResult<()> {
        self.with_inner(|inner| {
            if !inner.tx_open {
                return Err(DbError::NoTransaction);
            }
            inner
                .conn
                .execute_batch(
                    "DELETE FROM engine_current;
                     DELETE FROM engine_undo;
                     DELETE FROM engine_changelog;
                     DELETE FROM engine_meta;",
                )
                .map_err(sql_err)?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use ludex_db_tests::storage_contract_tests;

    use super::*;

    storage_contract_tests!(SqliteStorage::open_in_memory().expect("test: open"));

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::TempDir::new().expect("test: tempdir");

        {
            let store = open_sqlite_storage(dir.path()).expect("test: open");
            store.begin_transaction().unwrap();
            store
                .set_current_state(BlockHash::new([9; 32]), &GameStateData::from("kept"))
                .unwrap();
            store.commit_transaction().unwrap();
        }

        let store = open_sqlite_storage(dir.path()).expect("test: reopen");
        let (hash, state) = store.get_current_state().unwrap().unwrap();
        assert_eq!(hash, BlockHash::new([9; 32]));
        assert_eq!(state, GameStateData::from("kept"));
    }
}
