//! Adapter exposing a table-oriented rule set as [`GameRules`].
//!
//! The checkpoint state stored for a table game is a short digest string,
//! `"initial"` or `"block <hex>"`; the actual state lives in the rules'
//! tables.  Forward processing runs the rules' SQL under change capture;
//! backward processing replays the captured compensating script instead
//! of calling the rules again.

use std::sync::Arc;

use ludex_db::{DbError, DbResult};
use ludex_primitives::{Block, BlockHash, Chain, GameStateData, UndoData};
use ludex_rules::{GameRules, InitialStateSpec, RulesError};
use ludex_status::{verify_selector, QueryError, ViewSelector};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::*;

use crate::{
    changelog::{apply_undo_script, clear_changelog, drain_changelog, install_capture_triggers},
    ids::{IdPool, IDS_SCHEMA},
    storage::{sql_err, ConnInner, SqliteStorage},
};

const INITIAL_DIGEST: &str = "initial";
const INITIALISED_MARKER: &str = "initialised";

/// Rule hooks for a game whose state is a set of SQLite tables.
///
/// All hooks run on the engine's shared connection inside the engine's
/// transaction.  Tables must be declared (with `IF NOT EXISTS` DDL) in
/// `setup_schema` and be ordinary rowid tables; tables created later are
/// not change-captured.
pub trait SqliteGameRules: Send + Sync + 'static {
    /// Height and hash of the block the initial state is defined at.
    fn initial_state_block(&self, chain: Chain) -> Result<(u32, BlockHash), RulesError>;

    /// Creates the game's tables.  Runs on every attach.
    fn setup_schema(&self, db: &Connection, ids: &IdPool<'_>) -> Result<(), RulesError>;

    /// Installs the initial table content.  Runs lazily, exactly once per
    /// database (unless rolled back by a failure).
    fn initialise_state(&self, db: &Connection, ids: &IdPool<'_>) -> Result<(), RulesError>;

    /// Applies one block's moves to the tables.
    fn update_state(
        &self,
        db: &Connection,
        ids: &IdPool<'_>,
        block: &Block,
    ) -> Result<(), RulesError>;

    /// Reads the current table content into the JSON view.
    fn state_to_view(&self, db: &Connection) -> Result<serde_json::Value, RulesError>;
}

/// [`GameRules`] implementation wrapping a [`SqliteGameRules`] set and the
/// table storage it shares with the engine.
pub struct SqliteGame<R: SqliteGameRules> {
    storage: Arc<SqliteStorage>,
    rules: R,
    chain: Chain,
    initial_height: u32,
    initial_hash: BlockHash,
}

impl<R: SqliteGameRules> std::fmt::Debug for SqliteGame<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteGame")
            .field("chain", &self.chain)
            .field("initial_height", &self.initial_height)
            .field("initial_hash", &self.initial_hash)
            .finish_non_exhaustive()
    }
}

fn digest(hash: &BlockHash) -> GameStateData {
    GameStateData::from(format!("block {hash}").as_str())
}

impl<R: SqliteGameRules> SqliteGame<R> {
    /// Attaches the rules to the storage: installs the id table, runs the
    /// rules' schema hook and the capture triggers, all in one
    /// transaction.  Re-attaching to an existing database is harmless.
    pub fn new(storage: Arc<SqliteStorage>, rules: R, chain: Chain) -> anyhow::Result<Self> {
        let (initial_height, initial_hash) = rules
            .initial_state_block(chain)
            .map_err(|e| anyhow::anyhow!("initial state block: {e}"))?;

        storage
            .with_inner(|inner| {
                let own_tx = !inner.tx_open;
                if own_tx {
                    inner
                        .conn
                        .execute_batch("BEGIN IMMEDIATE")
                        .map_err(sql_err)?;
                }
                let res = Self::setup_locked(&inner.conn, &rules);
                if own_tx {
                    let end = if res.is_ok() { "COMMIT" } else { "ROLLBACK" };
                    inner.conn.execute_batch(end).map_err(sql_err)?;
                }
                res
            })
            .map_err(|e: DbError| anyhow::anyhow!("game schema setup: {e}"))?;

        Ok(Self {
            storage,
            rules,
            chain,
            initial_height,
            initial_hash,
        })
    }

    fn setup_locked(conn: &Connection, rules: &R) -> DbResult<()> {
        conn.execute_batch("PRAGMA recursive_triggers = ON;")
            .map_err(sql_err)?;
        conn.execute_batch(IDS_SCHEMA).map_err(sql_err)?;
        rules
            .setup_schema(conn, &IdPool::new(conn))
            .map_err(|e| DbError::Other(format!("setup_schema: {e}")))?;
        install_capture_triggers(conn)?;
        Ok(())
    }

    /// The storage handle shared with the engine.
    pub fn storage(&self) -> Arc<SqliteStorage> {
        self.storage.clone()
    }

    pub fn chain(&self) -> Chain {
        self.chain
    }

    /// The wrapped rule set.
    pub fn rules(&self) -> &R {
        &self.rules
    }

    pub fn initial_block(&self) -> (u32, BlockHash) {
        (self.initial_height, self.initial_hash)
    }

    fn is_initialised(conn: &Connection) -> DbResult<bool> {
        let row: Option<String> = conn
            .query_row(
                "SELECT value FROM engine_meta WHERE key = ?1",
                params![INITIALISED_MARKER],
                |row| row.get(0),
            )
            .optional()
            .map_err(sql_err)?;
        Ok(row.is_some())
    }

    /// Installs the initial table content if it is not there yet.  Runs
    /// inside whatever transaction is open; the caller handles rollback
    /// on error.
    fn ensure_initialised_locked(&self, conn: &Connection) -> Result<(), RulesError> {
        if Self::is_initialised(conn).map_err(RulesError::backend)? {
            return Ok(());
        }

        debug!("installing initial game state into tables");
        self.rules.initialise_state(conn, &IdPool::new(conn))?;
        conn.execute(
            "INSERT INTO engine_meta (key, value) VALUES (?1, '1')",
            params![INITIALISED_MARKER],
        )
        .map_err(RulesError::backend)?;
        // Initial content is the baseline; it is never undone.
        clear_changelog(conn).map_err(RulesError::backend)?;
        Ok(())
    }

    /// Like [`Self::ensure_initialised_locked`] but opens its own
    /// transaction when the engine has none, e.g. on a view request
    /// before the first block.
    fn ensure_initialised(&self, inner: &mut ConnInner) -> Result<(), RulesError> {
        if Self::is_initialised(&inner.conn).map_err(RulesError::backend)? {
            return Ok(());
        }
        let own_tx = !inner.tx_open;
        if own_tx {
            inner
                .conn
                .execute_batch("BEGIN IMMEDIATE")
                .map_err(RulesError::backend)?;
        }
        let res = self.ensure_initialised_locked(&inner.conn);
        if own_tx {
            let end = if res.is_ok() { "COMMIT" } else { "ROLLBACK" };
            inner.conn.execute_batch(end).map_err(RulesError::backend)?;
        }
        res
    }

    /// Serves a named game state string, verified strictly against the
    /// stored checkpoint (`"initial"`, `"block <hex>"`, `"current"`).
    pub fn game_state_to_json(&self, state: &str) -> Result<serde_json::Value, QueryError> {
        let selector = ViewSelector::parse(state)?;

        self.storage.with_inner(|inner| {
            let current = current_hash(&inner.conn)
                .map_err(QueryError::Db)?
                .ok_or(QueryError::NoState)?;
            verify_selector(&selector, &current, &self.initial_hash)?;

            self.ensure_initialised(inner).map_err(QueryError::Rules)?;
            self.rules
                .state_to_view(&inner.conn)
                .map_err(QueryError::Rules)
        })
    }
}

fn current_hash(conn: &Connection) -> DbResult<Option<BlockHash>> {
    let row: Option<Vec<u8>> = conn
        .query_row("SELECT hash FROM engine_current WHERE id = 1", [], |row| {
            row.get(0)
        })
        .optional()
        .map_err(sql_err)?;
    match row {
        None => Ok(None),
        Some(bytes) => {
            let arr: [u8; 32] = bytes
                .try_into()
                .map_err(|_| DbError::CorruptedData("checkpoint hash size".into()))?;
            Ok(Some(BlockHash::new(arr)))
        }
    }
}

impl SqliteStorage {
    /// Runs rule-side work that must sit inside the engine's open
    /// transaction.  Rule writes outside a block transaction would not be
    /// atomic with the checkpoint, so those calls are rejected.
    fn with_game_tx<T>(
        &self,
        f: impl FnOnce(&mut ConnInner) -> Result<T, RulesError>,
    ) -> Result<T, RulesError> {
        self.with_inner(|inner| {
            if !inner.tx_open {
                return Err(RulesError::Rejected(
                    "rule processing outside a block transaction".into(),
                ));
            }
            f(inner)
        })
    }
}

impl<R: SqliteGameRules> GameRules for SqliteGame<R> {
    fn initial_state(&self, chain: Chain) -> Result<InitialStateSpec, RulesError> {
        let (height, hash) = self.rules.initial_state_block(chain)?;
        Ok(InitialStateSpec::new(
            GameStateData::from(INITIAL_DIGEST),
            height,
            hash,
        ))
    }

    fn process_forward(
        &self,
        _old: &GameStateData,
        block: &Block,
    ) -> Result<(GameStateData, UndoData), RulesError> {
        self.storage.with_game_tx(|inner| {
            self.ensure_initialised_locked(&inner.conn)?;
            clear_changelog(&inner.conn).map_err(RulesError::backend)?;

            self.rules
                .update_state(&inner.conn, &IdPool::new(&inner.conn), block)?;

            let script = drain_changelog(&inner.conn).map_err(RulesError::backend)?;
            let undo = borsh::to_vec(&script)
                .map_err(|e| RulesError::BadUndo(format!("encode undo script: {e}")))?;
            Ok((digest(&block.hash()), UndoData::new(undo)))
        })
    }

    fn process_backward(
        &self,
        _old: &GameStateData,
        block: &Block,
        undo: &UndoData,
    ) -> Result<GameStateData, RulesError> {
        self.storage.with_game_tx(|inner| {
            let script: Vec<String> = borsh::from_slice(undo.as_bytes())
                .map_err(|e| RulesError::BadUndo(format!("decode undo script: {e}")))?;
            apply_undo_script(&inner.conn, &script).map_err(RulesError::backend)?;

            let parent = block.parent();
            if parent == self.initial_hash {
                Ok(GameStateData::from(INITIAL_DIGEST))
            } else {
                Ok(digest(&parent))
            }
        })
    }

    fn state_to_view(&self, _state: &GameStateData) -> Result<serde_json::Value, RulesError> {
        self.storage.with_inner(|inner| {
            self.ensure_initialised(inner)?;
            self.rules.state_to_view(&inner.conn)
        })
    }
}
