//! Scriptable in-memory upstream daemon.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc,
    },
};

use ludex_primitives::{Block, BlockHash, BlockRef};
use ludex_upstream::{TipSubscription, UpstreamClient, UpstreamError, UpstreamResult};
use parking_lot::Mutex;

#[derive(Default)]
struct MockChain {
    /// Every block ever seen, including abandoned forks.
    blocks: HashMap<BlockHash, Block>,

    /// The active chain, oldest first.
    active: Vec<BlockHash>,
}

/// Mock upstream: tests script the chain, the client side answers like a
/// real daemon.  Abandoned blocks stay fetchable, as they do on a real
/// node.
#[derive(Default)]
pub struct MockUpstream {
    chain: Mutex<MockChain>,
    subscribers: Mutex<Vec<mpsc::Sender<BlockRef>>>,
    fail_rpc: AtomicBool,
}

impl MockUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    /// When set, every client call fails, simulating a daemon outage.
    pub fn set_fail_rpc(&self, v: bool) {
        self.fail_rpc.store(v, Ordering::SeqCst);
    }

    /// Replaces the active chain wholesale (earlier blocks stay known)
    /// and notifies subscribers of the new tip.
    pub fn set_chain(&self, blocks: Vec<Block>) {
        {
            let mut chain = self.chain.lock();
            chain.active = blocks.iter().map(|b| b.hash()).collect();
            for block in blocks {
                chain.blocks.insert(block.hash(), block);
            }
        }
        self.notify();
    }

    /// Appends one block to the active chain and notifies subscribers.
    pub fn push_block(&self, block: Block) {
        {
            let mut chain = self.chain.lock();
            chain.active.push(block.hash());
            chain.blocks.insert(block.hash(), block);
        }
        self.notify();
    }

    /// Re-sends the current tip to all subscribers.
    pub fn notify(&self) {
        let Some(tip) = self.tip_ref() else {
            return;
        };
        let mut subs = self.subscribers.lock();
        subs.retain(|tx| tx.send(tip).is_ok());
    }

    pub fn tip_ref(&self) -> Option<BlockRef> {
        let chain = self.chain.lock();
        let hash = chain.active.last()?;
        Some(chain.blocks[hash].reference)
    }

    fn check_rpc(&self) -> UpstreamResult<()> {
        if self.fail_rpc.load(Ordering::SeqCst) {
            return Err(UpstreamError::Rpc("mock outage".into()));
        }
        Ok(())
    }
}

impl UpstreamClient for MockUpstream {
    fn get_tip(&self) -> UpstreamResult<BlockRef> {
        self.check_rpc()?;
        self.tip_ref()
            .ok_or_else(|| UpstreamError::Rpc("mock chain is empty".into()))
    }

    fn get_block(&self, hash: &BlockHash) -> UpstreamResult<Block> {
        self.check_rpc()?;
        self.chain
            .lock()
            .blocks
            .get(hash)
            .cloned()
            .ok_or(UpstreamError::UnknownBlock(*hash))
    }

    fn is_on_active_chain(&self, hash: &BlockHash) -> UpstreamResult<bool> {
        self.check_rpc()?;
        Ok(self.chain.lock().active.contains(hash))
    }

    fn subscribe(&self) -> UpstreamResult<TipSubscription> {
        self.check_rpc()?;
        let (tx, rx) = mpsc::channel();
        self.subscribers.lock().push(tx);
        Ok(TipSubscription::new(rx))
    }
}
