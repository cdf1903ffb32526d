//! Container for the synchronizer's published status.

use ludex_primitives::{BlockRef, Chain};
use serde::Serialize;
use tokio::sync::watch;

/// Where the synchronizer stands relative to the upstream chain.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncStateKind {
    /// Not connected to the upstream daemon.
    Disconnected,

    /// Remote chain has not yet reached the rules' initial height.
    Pregenesis,

    /// Local tip lags or diverges from the remote tip.
    CatchingUp,

    /// Local tip equals the remote tip.
    UpToDate,

    /// The engine has shut down; no further updates follow.
    Stopped,
}

/// Snapshot published after every committed checkpoint change.
#[derive(Copy, Clone, Debug, Serialize)]
pub struct SyncStatus {
    pub state: SyncStateKind,

    /// The current checkpoint block; `None` while virgin.
    pub tip: Option<BlockRef>,

    pub chain: Chain,
}

impl SyncStatus {
    pub fn initial(chain: Chain) -> Self {
        Self {
            state: SyncStateKind::Disconnected,
            tip: None,
            chain,
        }
    }

    pub fn is_up_to_date(&self) -> bool {
        self.state == SyncStateKind::UpToDate
    }
}

/// Writer half, owned by the synchronizer.
#[derive(Debug)]
pub struct StatusChannel {
    tx: watch::Sender<SyncStatus>,
}

/// Reader half, cheap to clone into query handles and RPC servers.
#[derive(Clone, Debug)]
pub struct StatusReceiver {
    rx: watch::Receiver<SyncStatus>,
}

impl StatusChannel {
    pub fn new(chain: Chain) -> (StatusChannel, StatusReceiver) {
        let (tx, rx) = watch::channel(SyncStatus::initial(chain));
        (StatusChannel { tx }, StatusReceiver { rx })
    }

    /// Publishes a new status.  Commit order on the writer side is
    /// publication order, so readers observe checkpoints monotonically.
    pub fn publish(&self, status: SyncStatus) {
        let _ = self.tx.send(status);
    }
}

impl StatusReceiver {
    pub fn get(&self) -> SyncStatus {
        *self.rx.borrow()
    }

    pub fn is_stopped(&self) -> bool {
        self.get().state == SyncStateKind::Stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_and_read() {
        let (tx, rx) = StatusChannel::new(Chain::Regtest);
        assert_eq!(rx.get().state, SyncStateKind::Disconnected);

        tx.publish(SyncStatus {
            state: SyncStateKind::UpToDate,
            tip: None,
            chain: Chain::Regtest,
        });
        assert!(rx.get().is_up_to_date());
    }
}
