use std::time::Duration;

/// Tuning knobs for the sync worker.
#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// First retry delay after a failed block transaction.
    pub retry_base_dur: Duration,

    /// Retries per block before the failure is treated as fatal.
    pub retry_cnt_max: u32,

    /// Backoff multiplier in thousandths (1120 = +12% per retry).
    pub retry_backoff_mult: u64,

    /// First reconnect delay after an upstream error.
    pub reconnect_base_dur: Duration,

    /// Cap on the reconnect delay.
    pub reconnect_max_dur: Duration,

    /// Undo entries older than this many blocks below the tip are pruned
    /// once the engine is up to date.  `None` disables pruning.
    pub prune_depth: Option<u32>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            retry_base_dur: Duration::from_millis(1000),
            retry_cnt_max: 20,
            retry_backoff_mult: 1120,
            reconnect_base_dur: Duration::from_millis(500),
            reconnect_max_dur: Duration::from_secs(30),
            prune_depth: None,
        }
    }
}

impl SyncConfig {
    pub(crate) fn compute_retry_backoff(&self, cur: Duration) -> Duration {
        Duration::from_millis(cur.as_millis() as u64 * self.retry_backoff_mult / 1000)
    }

    pub(crate) fn compute_reconnect_backoff(&self, cur: Duration) -> Duration {
        (cur * 2).min(self.reconnect_max_dur)
    }
}
