//! Engine-level scenarios: catch-up and reorg through the full stack,
//! persistence across restart on the relational backend, named-view
//! refusals and the RPC surface.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use ludex_db_sqlite::{IdPool, SqliteGameRules};
use ludex_engine::{Engine, EngineConfig, RpcSurface, StorageBackend};
use ludex_primitives::{Block, BlockHash, Chain};
use ludex_rules::RulesError;
use ludex_status::{QueryError, SyncStateKind, ViewSelector};
use ludex_test_utils::{
    block_at, block_with, chat_move, test_hash, ChatRules, MockUpstream, CHAT_GENESIS_HEIGHT,
};
use serde_json::json;

fn genesis_block() -> Block {
    block_at(CHAT_GENESIS_HEIGHT, test_hash(9), vec![])
}

fn wait_until(what: &str, mut pred: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if pred() {
            return;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    panic!("timed out waiting for {what}");
}

fn wait_for_height(engine: &Engine, height: u32) {
    let status = engine.status();
    wait_until(&format!("tip at height {height}"), || {
        let s = status.get();
        s.state == SyncStateKind::UpToDate && s.tip.map(|t| t.height) == Some(height)
    });
}

fn test_config() -> EngineConfig {
    EngineConfig {
        chain: Chain::Regtest,
        ..Default::default()
    }
}

#[test]
fn test_memory_engine_catch_up_and_views() {
    let upstream = Arc::new(MockUpstream::new());
    let g = genesis_block();
    let b11 = block_at(
        11,
        g.hash(),
        vec![chat_move("a", &["x", "y"]), chat_move("domob", &["new"])],
    );
    let b12 = block_at(12, b11.hash(), vec![chat_move("a", &["z"])]);
    upstream.set_chain(vec![g, b11, b12.clone()]);

    let engine = Engine::launch(test_config(), "chat", ChatRules::new(), upstream)
        .expect("launch engine");
    wait_for_height(&engine, 12);

    let query = engine.query();
    assert_eq!(
        query.current_view().unwrap(),
        json!({"a": "z", "domob": "new", "foo": "bar"})
    );

    // Named views verify strictly against the checkpoint.
    let err = query.view_at(ViewSelector::Initial).unwrap_err();
    assert!(matches!(err, QueryError::PreconditionFailed(_)));

    assert_eq!(
        query
            .view_at(ViewSelector::Block(b12.hash()))
            .unwrap(),
        json!({"a": "z", "domob": "new", "foo": "bar"})
    );
    let err = query
        .view_at(ViewSelector::Block(test_hash(999)))
        .unwrap_err();
    assert!(matches!(err, QueryError::PreconditionFailed(_)));

    let query = engine.query();
    engine.shutdown().expect("clean shutdown");
    assert!(matches!(query.current_view(), Err(QueryError::Shutdown)));
}

#[test]
fn test_engine_reorg_keeps_single_undo_suffix() {
    let upstream = Arc::new(MockUpstream::new());
    let g = genesis_block();
    let a11 = block_with(test_hash(111), 11, g.hash(), vec![chat_move("p", &["a"])]);
    upstream.set_chain(vec![g.clone(), a11.clone()]);

    let engine = Engine::launch(test_config(), "chat", ChatRules::new(), upstream.clone())
        .expect("launch engine");
    wait_for_height(&engine, 11);

    let b11 = block_with(test_hash(211), 11, g.hash(), vec![chat_move("p", &["b"])]);
    upstream.set_chain(vec![g, b11.clone()]);

    let status = engine.status();
    wait_until("reorg onto fork b", || {
        status.get().tip.map(|t| t.hash == b11.hash()).unwrap_or(false)
    });
    assert_eq!(
        engine.query().current_view().unwrap(),
        json!({"p": "b", "domob": "hello world", "foo": "bar"})
    );

    engine.shutdown().expect("clean shutdown");
}

/// Chat game over tables, for the persistence scenario.
struct ChatTableRules;

impl SqliteGameRules for ChatTableRules {
    fn initial_state_block(&self, _chain: Chain) -> Result<(u32, BlockHash), RulesError> {
        Ok((CHAT_GENESIS_HEIGHT, test_hash(CHAT_GENESIS_HEIGHT)))
    }

    fn setup_schema(
        &self,
        db: &rusqlite::Connection,
        _ids: &IdPool<'_>,
    ) -> Result<(), RulesError> {
        db.execute_batch("CREATE TABLE IF NOT EXISTS chat (user TEXT PRIMARY KEY, msg TEXT);")
            .map_err(RulesError::backend)
    }

    fn initialise_state(
        &self,
        db: &rusqlite::Connection,
        _ids: &IdPool<'_>,
    ) -> Result<(), RulesError> {
        db.execute_batch(
            "INSERT INTO chat (user, msg) VALUES ('domob', 'hello world');
             INSERT INTO chat (user, msg) VALUES ('foo', 'bar');",
        )
        .map_err(RulesError::backend)
    }

    fn update_state(
        &self,
        db: &rusqlite::Connection,
        _ids: &IdPool<'_>,
        block: &Block,
    ) -> Result<(), RulesError> {
        for m in &block.moves {
            let entries = m
                .mv
                .as_array()
                .ok_or_else(|| RulesError::Rejected("move is not an array".into()))?;
            for v in entries {
                let msg = v
                    .as_str()
                    .ok_or_else(|| RulesError::Rejected("move entry is not a string".into()))?;
                db.execute(
                    "INSERT OR REPLACE INTO chat (user, msg) VALUES (?1, ?2)",
                    rusqlite::params![m.name, msg],
                )
                .map_err(RulesError::backend)?;
            }
        }
        Ok(())
    }

    fn state_to_view(&self, db: &rusqlite::Connection) -> Result<serde_json::Value, RulesError> {
        let mut stmt = db
            .prepare("SELECT user, msg FROM chat")
            .map_err(RulesError::backend)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(RulesError::backend)?;

        let mut out = serde_json::Map::new();
        for row in rows {
            let (user, msg) = row.map_err(RulesError::backend)?;
            out.insert(user, serde_json::Value::String(msg));
        }
        Ok(serde_json::Value::Object(out))
    }
}

#[test]
fn test_sqlite_engine_state_survives_restart() {
    let dir = tempfile::TempDir::new().expect("tempdir");
    let config = EngineConfig {
        chain: Chain::Regtest,
        storage_backend: StorageBackend::Sqlite,
        data_dir: Some(dir.path().to_path_buf()),
        ..Default::default()
    };

    let upstream = Arc::new(MockUpstream::new());
    let g = genesis_block();
    let b11 = block_at(11, g.hash(), vec![chat_move("domob", &["new"])]);
    upstream.set_chain(vec![g, b11.clone()]);

    let expected = json!({"domob": "new", "foo": "bar"});

    {
        let engine =
            Engine::launch_sqlite(config.clone(), "chat", ChatTableRules, upstream.clone())
                .expect("launch engine");
        wait_for_height(&engine, 11);
        assert_eq!(engine.query().current_view().unwrap(), expected);
        engine.shutdown().expect("clean shutdown");
    }

    // Same data_dir, fresh engine: the state is there without replay.
    let engine = Engine::launch_sqlite(config, "chat", ChatTableRules, upstream)
        .expect("relaunch engine");
    wait_for_height(&engine, 11);
    assert_eq!(engine.query().current_view().unwrap(), expected);
    assert_eq!(
        engine.status().get().tip.map(|t| t.hash),
        Some(b11.hash())
    );
    engine.shutdown().expect("clean shutdown");
}

#[test]
fn test_rpc_surface_serves_state() {
    use jsonrpsee::{core::client::ClientT, http_client::HttpClientBuilder, rpc_params};
    use ludex_engine::RpcTip;

    let upstream = Arc::new(MockUpstream::new());
    let g = genesis_block();
    upstream.set_chain(vec![g.clone()]);

    let config = EngineConfig {
        chain: Chain::Regtest,
        rpc_surface: RpcSurface::LocalTcp,
        rpc_port: 38291,
        ..Default::default()
    };
    let engine =
        Engine::launch(config, "chat", ChatRules::new(), upstream).expect("launch engine");
    wait_for_height(&engine, CHAT_GENESIS_HEIGHT);
    let addr = engine.rpc_addr().expect("rpc bound");

    let rt = tokio::runtime::Runtime::new().expect("client runtime");
    rt.block_on(async {
        let client = HttpClientBuilder::default()
            .build(format!("http://{addr}"))
            .expect("client");

        let tip: Option<RpcTip> = client
            .request("ludex_getTip", rpc_params![])
            .await
            .expect("getTip");
        let tip = tip.expect("have tip");
        assert_eq!(tip.height, CHAT_GENESIS_HEIGHT);
        assert_eq!(tip.hash, g.hash().to_hex());
        assert_eq!(tip.parent, g.parent().to_hex());

        let state: serde_json::Value = client
            .request("ludex_getCurrentState", rpc_params![])
            .await
            .expect("getCurrentState");
        assert_eq!(state, json!({"domob": "hello world", "foo": "bar"}));

        let state: serde_json::Value = client
            .request("ludex_getStateAt", rpc_params!["initial"])
            .await
            .expect("getStateAt initial");
        assert_eq!(state, json!({"domob": "hello world", "foo": "bar"}));

        let err = client
            .request::<serde_json::Value, _>("ludex_getStateAt", rpc_params!["bogus"])
            .await;
        assert!(err.is_err());
    });

    engine.shutdown().expect("clean shutdown");
}
