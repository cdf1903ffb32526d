//! JSON-RPC surface over the state query API.

use std::sync::Arc;

use jsonrpsee::{
    core::{async_trait, RpcResult},
    proc_macros::rpc,
    types::ErrorObjectOwned,
};
use ludex_status::{QueryError, StateQuery, ViewSelector};
use ludex_sync::ShutdownSignal;
use serde::{Deserialize, Serialize};

/// Checkpoint block as served over RPC.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcTip {
    pub height: u32,
    pub hash: String,
    pub parent: String,
}

#[rpc(server, namespace = "ludex")]
pub trait GameRpc {
    /// Current checkpoint position, if any.
    #[method(name = "getTip")]
    async fn get_tip(&self) -> RpcResult<Option<RpcTip>>;

    /// View of the current game state.
    #[method(name = "getCurrentState")]
    async fn get_current_state(&self) -> RpcResult<serde_json::Value>;

    /// View of a named game state: "initial", "block <hex>" or
    /// "current".
    #[method(name = "getStateAt")]
    async fn get_state_at(&self, selector: String) -> RpcResult<serde_json::Value>;

    /// Asks the engine to shut down.
    #[method(name = "stop")]
    async fn stop(&self) -> RpcResult<()>;
}

pub(crate) struct GameRpcImpl {
    query: Arc<StateQuery>,
    shutdown: ShutdownSignal,
}

impl GameRpcImpl {
    pub(crate) fn new(query: Arc<StateQuery>, shutdown: ShutdownSignal) -> Self {
        Self { query, shutdown }
    }
}

fn to_rpc_error(e: QueryError) -> ErrorObjectOwned {
    let code = match &e {
        QueryError::BadSelector(_) => -32602,
        QueryError::PreconditionFailed(_) => -32001,
        QueryError::NoState => -32002,
        QueryError::Shutdown => -32003,
        QueryError::Rules(_) | QueryError::Db(_) => -32000,
    };
    ErrorObjectOwned::owned(code, e.to_string(), None::<()>)
}

#[async_trait]
impl GameRpcServer for GameRpcImpl {
    async fn get_tip(&self) -> RpcResult<Option<RpcTip>> {
        let tip = self.query.tip().map_err(to_rpc_error)?;
        Ok(tip.map(|t| RpcTip {
            height: t.height,
            hash: t.hash.to_hex(),
            parent: t.parent.to_hex(),
        }))
    }

    async fn get_current_state(&self) -> RpcResult<serde_json::Value> {
        self.query.current_view().map_err(to_rpc_error)
    }

    async fn get_state_at(&self, selector: String) -> RpcResult<serde_json::Value> {
        let selector = ViewSelector::parse(&selector).map_err(to_rpc_error)?;
        self.query.view_at(selector).map_err(to_rpc_error)
    }

    async fn stop(&self) -> RpcResult<()> {
        tracing::info!("shutdown requested over rpc");
        self.shutdown.trigger();
        Ok(())
    }
}
