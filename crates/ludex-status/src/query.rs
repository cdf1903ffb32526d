//! Thread-safe query surface over the current game state.

use std::sync::Arc;

use ludex_db::{DbError, Storage};
use ludex_primitives::{BlockHash, BlockRef};
use ludex_rules::{GameRules, RulesError};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;

use crate::{selector::verify_selector, StatusReceiver, ViewSelector};

/// Errors surfaced to query callers.
#[derive(Debug, Error)]
pub enum QueryError {
    /// The requested view does not match the current checkpoint.
    #[error("{0}")]
    PreconditionFailed(String),

    /// Unrecognized view selector string.
    #[error("Unexpected game state value: {0}")]
    BadSelector(String),

    /// No checkpoint exists yet.
    #[error("no game state is available yet")]
    NoState,

    /// The engine has shut down.
    #[error("engine is shut down")]
    Shutdown,

    #[error("rules failed to build the view: {0}")]
    Rules(#[from] RulesError),

    #[error("storage read failed: {0}")]
    Db(#[from] DbError),
}

/// Gate serializing readers against the synchronizer's block transaction.
///
/// The worker holds the write side for the duration of each transaction,
/// so a query sees the pre-transaction state or waits for the commit,
/// never a torn intermediate.
#[derive(Debug, Default)]
pub struct TxGate {
    lock: RwLock<()>,
}

impl TxGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&self) -> RwLockReadGuard<'_, ()> {
        self.lock.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, ()> {
        self.lock.write()
    }
}

/// Read-only view of the engine exposed to applications.
pub struct StateQuery {
    storage: Arc<dyn Storage>,
    rules: Arc<dyn GameRules>,
    gate: Arc<TxGate>,
    status: StatusReceiver,
    initial_hash: BlockHash,
}

impl std::fmt::Debug for StateQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateQuery")
            .field("initial_hash", &self.initial_hash)
            .finish_non_exhaustive()
    }
}

impl StateQuery {
    pub fn new(
        storage: Arc<dyn Storage>,
        rules: Arc<dyn GameRules>,
        gate: Arc<TxGate>,
        status: StatusReceiver,
        initial_hash: BlockHash,
    ) -> Self {
        Self {
            storage,
            rules,
            gate,
            status,
            initial_hash,
        }
    }

    fn check_running(&self) -> Result<(), QueryError> {
        if self.status.is_stopped() {
            return Err(QueryError::Shutdown);
        }
        Ok(())
    }

    /// The current checkpoint block, if any.
    pub fn tip(&self) -> Result<Option<BlockRef>, QueryError> {
        self.check_running()?;
        Ok(self.status.get().tip)
    }

    /// The synchronizer's published status.
    pub fn status(&self) -> StatusReceiver {
        self.status.clone()
    }

    /// View of the current state.
    pub fn current_view(&self) -> Result<serde_json::Value, QueryError> {
        self.view_at(ViewSelector::Current)
    }

    /// View of the state named by `selector`, verified strictly against
    /// the current checkpoint.
    pub fn view_at(&self, selector: ViewSelector) -> Result<serde_json::Value, QueryError> {
        self.check_running()?;
        let _read = self.gate.read();

        let (current, state) = self
            .storage
            .get_current_state()?
            .ok_or(QueryError::NoState)?;
        verify_selector(&selector, &current, &self.initial_hash)?;

        Ok(self.rules.state_to_view(&state)?)
    }
}

#[cfg(test)]
mod tests {
    use ludex_db::MemoryStorage;
    use ludex_primitives::{Block, Chain, GameStateData, UndoData};
    use ludex_rules::InitialStateSpec;

    use super::*;
    use crate::{StatusChannel, SyncStateKind, SyncStatus};

    struct EchoRules;

    impl GameRules for EchoRules {
        fn initial_state(&self, _chain: Chain) -> Result<InitialStateSpec, RulesError> {
            Ok(InitialStateSpec::new(
                GameStateData::from("{}"),
                10,
                BlockHash::new([1; 32]),
            ))
        }

        fn process_forward(
            &self,
            _old: &GameStateData,
            _block: &Block,
        ) -> Result<(GameStateData, UndoData), RulesError> {
            unreachable!("not exercised")
        }

        fn process_backward(
            &self,
            _old: &GameStateData,
            _block: &Block,
            _undo: &UndoData,
        ) -> Result<GameStateData, RulesError> {
            unreachable!("not exercised")
        }
    }

    fn setup(current: BlockHash) -> (StateQuery, StatusChannel) {
        let storage = Arc::new(MemoryStorage::new());
        storage.begin_transaction().unwrap();
        storage
            .set_current_state(current, &GameStateData::from("{\"foo\":\"bar\"}"))
            .unwrap();
        storage.commit_transaction().unwrap();

        let (tx, rx) = StatusChannel::new(Chain::Regtest);
        let query = StateQuery::new(
            storage,
            Arc::new(EchoRules),
            Arc::new(TxGate::new()),
            rx,
            BlockHash::new([1; 32]),
        );
        (query, tx)
    }

    #[test]
    fn test_current_view_reads_state() {
        let (query, _tx) = setup(BlockHash::new([2; 32]));
        let view = query.current_view().unwrap();
        assert_eq!(view, serde_json::json!({"foo": "bar"}));
    }

    #[test]
    fn test_initial_view_refused_off_initial_block() {
        let (query, _tx) = setup(BlockHash::new([2; 32]));
        let err = query.view_at(ViewSelector::Initial).unwrap_err();
        assert!(matches!(err, QueryError::PreconditionFailed(_)));
    }

    #[test]
    fn test_initial_view_served_on_initial_block() {
        let (query, _tx) = setup(BlockHash::new([1; 32]));
        query.view_at(ViewSelector::Initial).unwrap();
    }

    #[test]
    fn test_queries_fail_after_shutdown() {
        let (query, tx) = setup(BlockHash::new([1; 32]));
        tx.publish(SyncStatus {
            state: SyncStateKind::Stopped,
            tip: None,
            chain: Chain::Regtest,
        });
        assert!(matches!(query.current_view(), Err(QueryError::Shutdown)));
        assert!(matches!(query.tip(), Err(QueryError::Shutdown)));
    }
}
