use ludex_primitives::BlockHash;
use thiserror::Error;

/// Failures talking to the upstream daemon.
///
/// All of these are transient from the engine's point of view: the
/// synchronizer drops to the disconnected state and reconnects with
/// backoff.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream connection failed: {0}")]
    Connection(String),

    #[error("upstream has no block {0}")]
    UnknownBlock(BlockHash),

    #[error("upstream rpc failed: {0}")]
    Rpc(String),

    /// The notification channel closed under us.
    #[error("tip subscription closed")]
    SubscriptionClosed,
}

pub type UpstreamResult<T> = Result<T, UpstreamError>;
