//! Capability abstraction over the blockchain daemon the engine follows.
//!
//! The core does not care about the wire protocol; anything that can
//! answer these four calls can drive a synchronizer.

mod errors;

use std::{sync::mpsc, time::Duration};

use ludex_primitives::{Block, BlockHash, BlockRef};

pub use errors::{UpstreamError, UpstreamResult};

/// Push channel of tip updates from the upstream daemon.
///
/// The sender side is owned by the client implementation; the channel
/// closing is how the synchronizer learns the connection died.
#[derive(Debug)]
pub struct TipSubscription {
    rx: mpsc::Receiver<BlockRef>,
}

/// Outcome of one receive on the subscription.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TipPoll {
    /// A new tip notification.
    Tip(BlockRef),

    /// Nothing arrived (yet).
    Empty,

    /// The upstream closed the channel.
    Closed,
}

impl TipSubscription {
    pub fn new(rx: mpsc::Receiver<BlockRef>) -> Self {
        Self { rx }
    }

    /// Blocks for the next tip notification, up to `timeout`.  The
    /// bounded wait is what lets the worker observe its shutdown guard
    /// between notifications.
    pub fn recv_timeout(&mut self, timeout: Duration) -> TipPoll {
        match self.rx.recv_timeout(timeout) {
            Ok(tip) => TipPoll::Tip(tip),
            Err(mpsc::RecvTimeoutError::Timeout) => TipPoll::Empty,
            Err(mpsc::RecvTimeoutError::Disconnected) => TipPoll::Closed,
        }
    }

    /// Non-blocking receive, used to coalesce notification bursts.
    pub fn poll(&mut self) -> TipPoll {
        match self.rx.try_recv() {
            Ok(tip) => TipPoll::Tip(tip),
            Err(mpsc::TryRecvError::Empty) => TipPoll::Empty,
            Err(mpsc::TryRecvError::Disconnected) => TipPoll::Closed,
        }
    }
}

/// Blocking client interface to the upstream daemon.
pub trait UpstreamClient: Send + Sync + 'static {
    /// Current head of the upstream's active chain.
    fn get_tip(&self) -> UpstreamResult<BlockRef>;

    /// Fetches a block's position and game-addressed moves by hash.
    fn get_block(&self, hash: &BlockHash) -> UpstreamResult<Block>;

    /// Whether the given block is on the active chain right now.  This is
    /// the authority for reorg detection; height comparison is only ever a
    /// short-circuit.
    fn is_on_active_chain(&self, hash: &BlockHash) -> UpstreamResult<bool>;

    /// Opens the tip notification channel.
    fn subscribe(&self) -> UpstreamResult<TipSubscription>;
}

impl<U: UpstreamClient + ?Sized> UpstreamClient for std::sync::Arc<U> {
    fn get_tip(&self) -> UpstreamResult<BlockRef> {
        (**self).get_tip()
    }

    fn get_block(&self, hash: &BlockHash) -> UpstreamResult<Block> {
        (**self).get_block(hash)
    }

    fn is_on_active_chain(&self, hash: &BlockHash) -> UpstreamResult<bool> {
        (**self).is_on_active_chain(hash)
    }

    fn subscribe(&self) -> UpstreamResult<TipSubscription> {
        (**self).subscribe()
    }
}
