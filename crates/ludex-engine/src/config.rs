use std::{fmt, path::PathBuf, str::FromStr};

use ludex_primitives::Chain;
use thiserror::Error;

/// Which storage driver backs the engine.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StorageBackend {
    /// Volatile, for tests and throwaway runs.
    Memory,

    /// On-disk key-value store for opaque-blob games.
    Sled,

    /// On-disk relational store; required for table games.
    Sqlite,
}

impl fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StorageBackend::Memory => "memory",
            StorageBackend::Sled => "sled",
            StorageBackend::Sqlite => "sqlite",
        };
        f.write_str(s)
    }
}

impl FromStr for StorageBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "memory" => Ok(StorageBackend::Memory),
            "sled" => Ok(StorageBackend::Sled),
            "sqlite" => Ok(StorageBackend::Sqlite),
            other => Err(ConfigError::UnknownBackend(other.to_owned())),
        }
    }
}

/// Transport for the engine's JSON-RPC surface.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RpcSurface {
    /// No RPC server.
    None,

    /// HTTP bound to the loopback interface only.
    LocalTcp,

    /// HTTP bound on all interfaces.
    Http,
}

/// Engine construction options.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Which chain the upstream daemon follows.
    pub chain: Chain,

    pub storage_backend: StorageBackend,

    /// Base data directory; required for non-memory backends.  The
    /// engine works under `<data_dir>/<game_id>/<chain>/`.
    pub data_dir: Option<PathBuf>,

    /// Undo retention depth for the pruner; `None` disables pruning.
    pub prune_depth: Option<u32>,

    pub rpc_surface: RpcSurface,

    /// Required when `rpc_surface` is not `None`.
    pub rpc_port: u16,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chain: Chain::Main,
            storage_backend: StorageBackend::Memory,
            data_dir: None,
            prune_depth: None,
            rpc_surface: RpcSurface::None,
            rpc_port: 0,
        }
    }
}

/// Caller bugs in the configuration; fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("data_dir must be set for the {0} backend")]
    MissingDataDir(StorageBackend),

    #[error("rpc_port must be set when an RPC surface is enabled")]
    MissingRpcPort,

    #[error("unknown storage backend '{0}'")]
    UnknownBackend(String),

    #[error("failed to create data directory {0}: {1}")]
    DataDir(PathBuf, #[source] std::io::Error),
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage_backend != StorageBackend::Memory && self.data_dir.is_none() {
            return Err(ConfigError::MissingDataDir(self.storage_backend));
        }
        if self.rpc_surface != RpcSurface::None && self.rpc_port == 0 {
            return Err(ConfigError::MissingRpcPort);
        }
        Ok(())
    }

    /// The per-game, per-chain directory, created if missing.
    pub fn game_directory(&self, game_id: &str) -> Result<PathBuf, ConfigError> {
        let base = self
            .data_dir
            .as_ref()
            .ok_or(ConfigError::MissingDataDir(self.storage_backend))?;
        let dir = base.join(game_id).join(self.chain.name());
        if dir.is_dir() {
            tracing::info!(dir = %dir.display(), "using existing data directory");
        } else {
            tracing::info!(dir = %dir.display(), "creating data directory");
            std::fs::create_dir_all(&dir).map_err(|e| ConfigError::DataDir(dir.clone(), e))?;
        }
        Ok(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_memory_requires_data_dir() {
        let config = EngineConfig {
            storage_backend: StorageBackend::Sled,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingDataDir(_))
        ));
    }

    #[test]
    fn test_rpc_requires_port() {
        let config = EngineConfig {
            rpc_surface: RpcSurface::LocalTcp,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::MissingRpcPort)));
    }

    #[test]
    fn test_defaults_validate() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn test_backend_parse() {
        assert_eq!(
            "sqlite".parse::<StorageBackend>().unwrap(),
            StorageBackend::Sqlite
        );
        assert!("lmdb".parse::<StorageBackend>().is_err());
    }
}
