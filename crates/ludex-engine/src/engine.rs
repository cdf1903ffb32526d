//! Engine assembly and lifecycle.

use std::{
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
    thread,
};

use jsonrpsee::server::{Server, ServerHandle};
use ludex_db::{MemoryStorage, Storage};
use ludex_db_sled::open_sled_storage;
use ludex_db_sqlite::{open_sqlite_storage, SqliteGame, SqliteGameRules};
use ludex_rules::GameRules;
use ludex_status::{StateQuery, StatusChannel, StatusReceiver, TxGate};
use ludex_sync::{worker_task, ShutdownSignal, SyncConfig, WorkerState};
use ludex_upstream::UpstreamClient;
use tracing::*;

use crate::{
    config::{EngineConfig, RpcSurface, StorageBackend},
    rpc::{GameRpcImpl, GameRpcServer},
};

/// One running game daemon: storage, sync worker, query surface and
/// (optionally) the RPC server.
///
/// The engine owns the shutdown ordering: the worker is joined, flushing
/// or rolling back its in-flight transaction, before the storage handle
/// goes away.
pub struct Engine {
    runtime: tokio::runtime::Runtime,
    #[allow(dead_code)]
    storage: Arc<dyn Storage>,
    query: Arc<StateQuery>,
    status: StatusReceiver,
    shutdown: ShutdownSignal,
    worker: Option<thread::JoinHandle<anyhow::Result<()>>>,
    rpc_handle: Option<ServerHandle>,
    rpc_addr: Option<SocketAddr>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("rpc_addr", &self.rpc_addr)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Launches an engine for blob-state rules, creating the storage
    /// driver named by the configuration.
    pub fn launch<R, U>(
        config: EngineConfig,
        game_id: &str,
        rules: R,
        upstream: U,
    ) -> anyhow::Result<Engine>
    where
        R: GameRules,
        U: UpstreamClient,
    {
        config.validate()?;

        let storage: Arc<dyn Storage> = match config.storage_backend {
            StorageBackend::Memory => Arc::new(MemoryStorage::new()),
            StorageBackend::Sled => {
                let dir = config.game_directory(game_id)?;
                Arc::new(open_sled_storage(&dir)?)
            }
            StorageBackend::Sqlite => {
                let dir = config.game_directory(game_id)?;
                Arc::new(open_sqlite_storage(&dir)?)
            }
        };

        Self::launch_with_storage(config, game_id, Arc::new(rules), upstream, storage)
    }

    /// Launches an engine for a table game.  The storage backend is
    /// forced to sqlite; the rules share the engine's connection and
    /// transaction.
    pub fn launch_sqlite<R, U>(
        mut config: EngineConfig,
        game_id: &str,
        rules: R,
        upstream: U,
    ) -> anyhow::Result<Engine>
    where
        R: SqliteGameRules,
        U: UpstreamClient,
    {
        config.storage_backend = StorageBackend::Sqlite;
        config.validate()?;

        let dir = config.game_directory(game_id)?;
        let storage = Arc::new(open_sqlite_storage(&dir)?);
        let game = SqliteGame::new(storage.clone(), rules, config.chain)?;
        let storage: Arc<dyn Storage> = storage;

        Self::launch_with_storage(config, game_id, Arc::new(game), upstream, storage)
    }

    fn launch_with_storage<U: UpstreamClient>(
        config: EngineConfig,
        game_id: &str,
        rules: Arc<dyn GameRules>,
        upstream: U,
        storage: Arc<dyn Storage>,
    ) -> anyhow::Result<Engine> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;

        let (status_tx, status_rx) = StatusChannel::new(config.chain);
        let gate = Arc::new(TxGate::new());

        let initial_hash = rules
            .initial_state(config.chain)
            .map_err(|e| anyhow::anyhow!("resolving initial state: {e}"))?
            .hash;
        let query = Arc::new(StateQuery::new(
            storage.clone(),
            rules.clone(),
            gate.clone(),
            status_rx.clone(),
            initial_hash,
        ));

        let sync_config = SyncConfig {
            prune_depth: config.prune_depth,
            ..Default::default()
        };
        let state = WorkerState::open(
            storage.clone(),
            rules,
            upstream,
            config.chain,
            sync_config,
            gate,
            status_tx,
        )?;

        let (shutdown, guard) = ShutdownSignal::new();
        let worker = thread::Builder::new()
            .name(format!("{game_id}-sync"))
            .spawn(move || worker_task(state, guard))?;

        let (rpc_handle, rpc_addr) = match config.rpc_surface {
            RpcSurface::None => {
                warn!("no connector configured for the game rpc server, queries are in-process only");
                (None, None)
            }
            surface => {
                let host = match surface {
                    RpcSurface::LocalTcp => Ipv4Addr::LOCALHOST,
                    _ => Ipv4Addr::UNSPECIFIED,
                };
                let addr = SocketAddr::from((host, config.rpc_port));
                let rpc = GameRpcImpl::new(query.clone(), shutdown.clone());
                let (handle, local) = runtime.block_on(async {
                    let server = Server::builder().build(addr).await?;
                    let local = server.local_addr()?;
                    Ok::<_, anyhow::Error>((server.start(rpc.into_rpc()), local))
                })?;
                info!(addr = %local, "game rpc server listening");
                (Some(handle), Some(local))
            }
        };

        Ok(Engine {
            runtime,
            storage,
            query,
            status: status_rx,
            shutdown,
            worker: Some(worker),
            rpc_handle,
            rpc_addr,
        })
    }

    /// Read surface for in-process queries.
    pub fn query(&self) -> Arc<StateQuery> {
        self.query.clone()
    }

    pub fn status(&self) -> StatusReceiver {
        self.status.clone()
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Bound address of the RPC server, when one is configured.
    pub fn rpc_addr(&self) -> Option<SocketAddr> {
        self.rpc_addr
    }

    /// Arranges for ctrl-c to trigger a clean shutdown.
    pub fn trigger_shutdown_on_ctrl_c(&self) {
        let signal = self.shutdown.clone();
        self.runtime.spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("ctrl-c received, shutting down");
                signal.trigger();
            }
        });
    }

    fn stop_rpc(&mut self) {
        if let Some(handle) = self.rpc_handle.take() {
            let _ = handle.stop();
        }
    }

    fn join_worker(&mut self) -> anyhow::Result<()> {
        match self.worker.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| anyhow::anyhow!("sync worker panicked"))?,
            None => Ok(()),
        }
    }

    /// Blocks until the worker exits: on a fatal fault, an RPC stop or a
    /// triggered shutdown signal.
    pub fn run(mut self) -> anyhow::Result<()> {
        let res = self.join_worker();
        self.stop_rpc();
        res
    }

    /// Asks the worker to stop and waits for it.
    pub fn shutdown(mut self) -> anyhow::Result<()> {
        self.shutdown.trigger();
        let res = self.join_worker();
        self.stop_rpc();
        res
    }
}

/// Process-wide tracing setup; safe to call more than once.
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Runs a blob-state game daemon to completion.  Returns `Ok` on clean
/// shutdown; callers map errors to a non-zero exit.
pub fn default_main<R, U>(
    config: EngineConfig,
    game_id: &str,
    rules: R,
    upstream: U,
) -> anyhow::Result<()>
where
    R: GameRules,
    U: UpstreamClient,
{
    init_logging();
    let engine = Engine::launch(config, game_id, rules, upstream)?;
    engine.trigger_shutdown_on_ctrl_c();
    engine.run()
}

/// Runs a table-game daemon to completion.
pub fn default_main_sqlite<R, U>(
    config: EngineConfig,
    game_id: &str,
    rules: R,
    upstream: U,
) -> anyhow::Result<()>
where
    R: SqliteGameRules,
    U: UpstreamClient,
{
    init_logging();
    let engine = Engine::launch_sqlite(config, game_id, rules, upstream)?;
    engine.trigger_shutdown_on_ctrl_c();
    engine.run()
}
