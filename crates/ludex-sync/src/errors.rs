use ludex_db::DbError;
use ludex_rules::RulesError;
use ludex_upstream::UpstreamError;
use thiserror::Error;

/// Failures inside the sync loop.
///
/// `Db` and `Rules` abort the current block transaction and are retried
/// with backoff; `Upstream` drops the connection; `ChainMismatch` and
/// `Invariant` are fatal.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The rules' declared initial block is not part of the upstream's
    /// chain.  The daemon is following the wrong chain, or the rules are
    /// wrong; either way there is nothing to retry.
    #[error("rules/chain mismatch: {0}")]
    ChainMismatch(String),

    /// Checkpoint / undo log inconsistency.
    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Rules(#[from] RulesError),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

impl SyncError {
    /// Whether retrying the same block could possibly help.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Db(_) | SyncError::Rules(_))
    }
}
