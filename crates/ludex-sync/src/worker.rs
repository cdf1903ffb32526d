//! Sync worker task.

use std::{sync::Arc, thread, time::Duration};

use ludex_db::Storage;
use ludex_primitives::{Block, BlockHash, BlockRef, Chain};
use ludex_rules::{GameRules, InitialStateSpec};
use ludex_status::{StatusChannel, SyncStateKind, SyncStatus, TxGate};
use ludex_upstream::{TipPoll, TipSubscription, UpstreamClient, UpstreamError};
use tracing::*;

use crate::{ShutdownGuard, SyncConfig, SyncError};

/// Longest stretch the worker blocks on the subscription before
/// re-checking the shutdown guard.
const IDLE_RECV_TIMEOUT: Duration = Duration::from_millis(100);

/// Mutable worker state owned by the sync task.
///
/// The worker is the sole writer to storage; anything readers need is
/// exported through the status channel and the transaction gate.
pub struct WorkerState<S, R, U> {
    storage: S,
    rules: R,
    upstream: U,
    chain: Chain,
    config: SyncConfig,
    gate: Arc<TxGate>,
    status: StatusChannel,

    /// The rules' declared starting point, resolved once at open.
    initial: InitialStateSpec,

    /// Sync state we are in right now.
    kind: SyncStateKind,

    /// The current checkpoint block, tracked alongside commits.
    cur_tip: Option<BlockRef>,
}

impl<S, R, U> WorkerState<S, R, U>
where
    S: Storage,
    R: GameRules,
    U: UpstreamClient,
{
    /// Constructs the worker state, resolving the rules' initial block.
    pub fn open(
        storage: S,
        rules: R,
        upstream: U,
        chain: Chain,
        config: SyncConfig,
        gate: Arc<TxGate>,
        status: StatusChannel,
    ) -> anyhow::Result<Self> {
        let initial = rules
            .initial_state(chain)
            .map_err(|e| anyhow::anyhow!("resolving initial state: {e}"))?;
        info!(%chain, height = initial.height, hash = %initial.hash, "resolved initial game state block");

        Ok(Self {
            storage,
            rules,
            upstream,
            chain,
            config,
            gate,
            status,
            initial,
            kind: SyncStateKind::Disconnected,
            cur_tip: None,
        })
    }

    /// The rules' declared initial block hash.
    pub fn initial_hash(&self) -> BlockHash {
        self.initial.hash
    }

    fn publish_current(&self) {
        self.status.publish(SyncStatus {
            state: self.kind,
            tip: self.cur_tip,
            chain: self.chain,
        });
    }

    fn set_kind(&mut self, kind: SyncStateKind) {
        if self.kind != kind {
            debug!(from = ?self.kind, to = ?kind, "sync state transition");
            self.kind = kind;
        }
        self.publish_current();
    }

    /// Subscribes to tip notifications and fetches the starting tip.
    fn connect(&mut self) -> Result<(TipSubscription, BlockRef), SyncError> {
        let sub = self.upstream.subscribe()?;
        let tip = self.upstream.get_tip()?;
        debug!(%tip, "connected to upstream");
        self.set_kind(SyncStateKind::CatchingUp);
        Ok((sub, tip))
    }

    /// Event loop while the upstream connection is healthy.  Returns
    /// `Ok(())` only on shutdown; connection loss and fatal faults come
    /// back as errors.
    fn run_connected(
        &mut self,
        sub: &mut TipSubscription,
        first_tip: BlockRef,
        shutdown: &ShutdownGuard,
    ) -> Result<(), SyncError> {
        let mut pending = Some(first_tip);

        loop {
            let mut tip = match pending.take() {
                Some(tip) => tip,
                None => loop {
                    if shutdown.should_shutdown() {
                        return Ok(());
                    }
                    match sub.recv_timeout(IDLE_RECV_TIMEOUT) {
                        TipPoll::Tip(tip) => break tip,
                        TipPoll::Empty => {}
                        TipPoll::Closed => return Err(UpstreamError::SubscriptionClosed.into()),
                    }
                },
            };

            // Coalesce queued notifications; only the newest tip matters.
            while let TipPoll::Tip(newer) = sub.poll() {
                tip = newer;
            }

            let span = debug_span!("tipevent", %tip);
            let _g = span.enter();
            self.process_tip_event(&tip, shutdown)?;

            if shutdown.should_shutdown() {
                return Ok(());
            }

            // A newer tip that arrived mid-catch-up is handled on the
            // next iteration rather than preempting this one.
            match sub.poll() {
                TipPoll::Tip(newer) => pending = Some(newer),
                TipPoll::Closed => return Err(UpstreamError::SubscriptionClosed.into()),
                TipPoll::Empty => {
                    if self.tip_matches(&tip)? {
                        self.set_kind(SyncStateKind::UpToDate);
                        self.maybe_prune(tip.height);
                    }
                }
            }
        }
    }

    fn tip_matches(&self, tip: &BlockRef) -> Result<bool, SyncError> {
        Ok(self
            .storage
            .get_current_state()?
            .map(|(hash, _)| hash == tip.hash)
            .unwrap_or(false))
    }

    /// Handles one (coalesced) tip observation: initializes the
    /// checkpoint if needed, rewinds off any abandoned fork and advances
    /// to the observed tip.
    fn process_tip_event(
        &mut self,
        tip: &BlockRef,
        shutdown: &ShutdownGuard,
    ) -> Result<(), SyncError> {
        if self.storage.get_current_state()?.is_none() {
            if tip.height < self.initial.height {
                debug!(%tip, initial_height = self.initial.height, "remote chain below initial height");
                self.set_kind(SyncStateKind::Pregenesis);
                return Ok(());
            }
            self.commit_initial_checkpoint(shutdown)?;
            if shutdown.should_shutdown() {
                return Ok(());
            }
        }

        self.set_kind(SyncStateKind::CatchingUp);

        // After a restart the checkpoint's position is only known to the
        // upstream.
        if self.cur_tip.is_none() {
            let (cur_hash, _) = self
                .storage
                .get_current_state()?
                .expect("sync: checkpoint vanished");
            let block = self.upstream.get_block(&cur_hash)?;
            self.cur_tip = Some(block.reference);
        }

        let common = self.rewind_to_active_chain(shutdown)?;
        if shutdown.should_shutdown() {
            return Ok(());
        }
        self.advance_to(tip, common, shutdown)
    }

    /// Plants the rules' initial checkpoint, after confirming with the
    /// upstream that the declared initial block really is on the chain
    /// being followed.
    fn commit_initial_checkpoint(&mut self, shutdown: &ShutdownGuard) -> Result<(), SyncError> {
        let hash = self.initial.hash;

        if !self.upstream.is_on_active_chain(&hash)? {
            return Err(SyncError::ChainMismatch(format!(
                "initial block {hash} is not on the upstream's active chain"
            )));
        }
        let block = self.upstream.get_block(&hash)?;
        if block.height() != self.initial.height {
            return Err(SyncError::ChainMismatch(format!(
                "initial block {hash} is at upstream height {}, rules declare {}",
                block.height(),
                self.initial.height
            )));
        }

        let done = self.with_block_retries("initialize", shutdown, |state| {
            let initial_state = state.initial.state.clone();
            state.in_transaction(|storage| {
                storage.set_current_state(hash, &initial_state)?;
                Ok(())
            })
        })?;
        if done.is_none() {
            return Ok(());
        }

        self.cur_tip = Some(block.reference);
        info!(tip = %block.reference, "committed initial game state");
        self.publish_current();
        Ok(())
    }

    /// Walks the checkpoint back until it sits on the upstream's active
    /// chain, detaching one block per transaction.  The upstream is the
    /// authority here; heights never substitute for the membership check.
    fn rewind_to_active_chain(
        &mut self,
        shutdown: &ShutdownGuard,
    ) -> Result<BlockHash, SyncError> {
        loop {
            let (cur_hash, _) = self
                .storage
                .get_current_state()?
                .ok_or_else(|| SyncError::Invariant("rewind on virgin storage".into()))?;

            if self.upstream.is_on_active_chain(&cur_hash)? {
                return Ok(cur_hash);
            }
            if cur_hash == self.initial.hash {
                return Err(SyncError::ChainMismatch(format!(
                    "initial block {cur_hash} left the active chain"
                )));
            }

            info!(%cur_hash, "checkpoint no longer on the active chain, rewinding");
            let block = self.upstream.get_block(&cur_hash)?;
            let done =
                self.with_block_retries("detach", shutdown, |state| state.detach_block(&block))?;
            if done.is_none() {
                // Shutting down mid-rewind; the caller notices the guard.
                return Ok(cur_hash);
            }
        }
    }

    /// Fetches the remote chain from `tip` back to `common`, then
    /// attaches the blocks oldest-first.
    fn advance_to(
        &mut self,
        tip: &BlockRef,
        common: BlockHash,
        shutdown: &ShutdownGuard,
    ) -> Result<(), SyncError> {
        let mut path = Vec::new();
        let mut cursor = tip.hash;
        while cursor != common {
            let block = self.upstream.get_block(&cursor)?;
            cursor = block.parent();
            let at_floor = block.height() <= self.initial.height;
            path.push(block);
            if at_floor && cursor != common {
                return Err(SyncError::Invariant(format!(
                    "chain walk passed the initial height without reaching \
                     local checkpoint {common}"
                )));
            }
        }

        if !path.is_empty() {
            info!(count = path.len(), target = %tip, "advancing toward remote tip");
        }
        for block in path.iter().rev() {
            if shutdown.should_shutdown() {
                return Ok(());
            }
            let done =
                self.with_block_retries("attach", shutdown, |state| state.attach_block(block))?;
            if done.is_none() {
                return Ok(());
            }
        }
        Ok(())
    }

    /// One forward transition: rules, undo entry and checkpoint move in a
    /// single transaction.
    fn attach_block(&mut self, block: &Block) -> Result<(), SyncError> {
        let rules = &self.rules;
        self.in_transaction(|storage| {
            let (_, old_state) = storage
                .get_current_state()?
                .ok_or_else(|| SyncError::Invariant("attach on virgin storage".into()))?;
            let (new_state, undo) = rules.process_forward(&old_state, block)?;
            storage.store_undo(block.hash(), block.height(), &undo)?;
            storage.set_current_state(block.hash(), &new_state)?;
            Ok(())
        })?;

        self.cur_tip = Some(block.reference);
        debug!(block = %block.reference, "attached block");
        self.publish_current();
        Ok(())
    }

    /// One backward transition, the exact inverse of [`Self::attach_block`].
    fn detach_block(&mut self, block: &Block) -> Result<(), SyncError> {
        // The parent becomes the checkpoint; fetch its position up front
        // so a failed fetch leaves the transition unrun.
        let parent_ref = self.upstream.get_block(&block.parent())?.reference;

        let rules = &self.rules;
        self.in_transaction(|storage| {
            let (cur_hash, old_state) = storage
                .get_current_state()?
                .ok_or_else(|| SyncError::Invariant("detach on virgin storage".into()))?;
            if cur_hash != block.hash() {
                return Err(SyncError::Invariant(format!(
                    "detaching {} but the checkpoint is {cur_hash}",
                    block.hash()
                )));
            }
            let undo = storage.get_undo(&cur_hash)?.ok_or_else(|| {
                SyncError::Invariant(format!("missing undo entry for {cur_hash}"))
            })?;
            let prior = rules.process_backward(&old_state, block, &undo)?;
            storage.delete_undo(&cur_hash)?;
            storage.set_current_state(block.parent(), &prior)?;
            Ok(())
        })?;

        self.cur_tip = Some(parent_ref);
        debug!(block = %block.reference, "detached block");
        self.publish_current();
        Ok(())
    }

    /// Runs `f` inside one storage transaction, holding the reader gate
    /// for the duration.  Rollback on any failure.
    fn in_transaction(
        &self,
        f: impl FnOnce(&S) -> Result<(), SyncError>,
    ) -> Result<(), SyncError> {
        let _write = self.gate.write();
        self.storage.begin_transaction()?;
        match f(&self.storage) {
            Ok(()) => match self.storage.commit_transaction() {
                Ok(()) => Ok(()),
                Err(e) => {
                    if let Err(re) = self.storage.rollback_transaction() {
                        warn!(err = %re, "rollback after failed commit also failed");
                    }
                    Err(e.into())
                }
            },
            Err(e) => {
                if let Err(re) = self.storage.rollback_transaction() {
                    warn!(err = %re, "rollback after failed transition also failed");
                }
                Err(e)
            }
        }
    }

    /// Retry loop for block transitions.  Transient faults back off and
    /// retry up to the configured limit; anything else aborts right away.
    /// `Ok(None)` means a shutdown arrived mid-retry.
    fn with_block_retries<T>(
        &mut self,
        what: &str,
        shutdown: &ShutdownGuard,
        mut f: impl FnMut(&mut Self) -> Result<T, SyncError>,
    ) -> Result<Option<T>, SyncError> {
        let mut tries = 0;
        let mut wait_dur = self.config.retry_base_dur;

        loop {
            tries += 1;

            let e = match f(self) {
                Ok(v) => return Ok(Some(v)),
                Err(e) => e,
            };
            if !e.is_retryable() {
                return Err(e);
            }
            if tries > self.config.retry_cnt_max {
                error!(err = %e, %tries, what, "failed block transition, hit tries limit, aborting");
                return Err(e);
            }

            warn!(err = %e, %tries, what, "failed block transition, retrying");
            thread::sleep(wait_dur);
            wait_dur = self.config.compute_retry_backoff(wait_dur);

            if shutdown.should_shutdown() {
                return Ok(None);
            }
        }
    }

    /// Best-effort pruning once up to date.  The tip's own undo entry is
    /// always kept.
    fn maybe_prune(&mut self, tip_height: u32) {
        let Some(depth) = self.config.prune_depth else {
            return;
        };
        let target = tip_height.saturating_sub(depth.max(1));

        let res = self.in_transaction(|storage| {
            storage.prune_undo_up_to(target)?;
            Ok(())
        });
        match res {
            Ok(()) => trace!(%target, "pruned undo entries"),
            Err(e) => warn!(err = %e, %target, "pruning failed, continuing"),
        }
    }
}

/// Runs the synchronizer until shutdown or a fatal fault.
///
/// Upstream faults drop back to the disconnected state and reconnect
/// with capped exponential backoff; everything else observes the retry
/// discipline inside the state machine.
pub fn worker_task<S, R, U>(
    mut state: WorkerState<S, R, U>,
    shutdown: ShutdownGuard,
) -> anyhow::Result<()>
where
    S: Storage,
    R: GameRules,
    U: UpstreamClient,
{
    info!(chain = %state.chain, "started sync worker");
    let mut reconnect_wait = state.config.reconnect_base_dur;

    loop {
        if shutdown.should_shutdown() {
            break;
        }

        let (mut sub, first_tip) = match state.connect() {
            Ok(v) => v,
            Err(e) => {
                state.set_kind(SyncStateKind::Disconnected);
                warn!(err = %e, "failed to connect to upstream, retrying");
                thread::sleep(reconnect_wait);
                reconnect_wait = state.config.compute_reconnect_backoff(reconnect_wait);
                continue;
            }
        };
        reconnect_wait = state.config.reconnect_base_dur;

        match state.run_connected(&mut sub, first_tip, &shutdown) {
            Ok(()) => break,
            Err(SyncError::Upstream(e)) => {
                state.set_kind(SyncStateKind::Disconnected);
                warn!(err = %e, "upstream connection lost, reconnecting");
                thread::sleep(reconnect_wait);
                reconnect_wait = state.config.compute_reconnect_backoff(reconnect_wait);
            }
            Err(e) => {
                error!(err = %e, "fatal sync failure, aborting");
                state.set_kind(SyncStateKind::Stopped);
                return Err(e.into());
            }
        }
    }

    state.set_kind(SyncStateKind::Stopped);
    info!("sync worker exiting");
    Ok(())
}
