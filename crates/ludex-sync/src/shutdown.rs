//! Cooperative shutdown plumbing for the worker task.

use tokio::sync::watch;

/// Owner side; triggering it asks the worker to wind down.
#[derive(Clone, Debug)]
pub struct ShutdownSignal {
    tx: watch::Sender<bool>,
}

/// Worker side; polled between units of work.
#[derive(Clone, Debug)]
pub struct ShutdownGuard {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub fn new() -> (ShutdownSignal, ShutdownGuard) {
        let (tx, rx) = watch::channel(false);
        (ShutdownSignal { tx }, ShutdownGuard { rx })
    }

    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }
}

impl ShutdownGuard {
    pub fn should_shutdown(&self) -> bool {
        *self.rx.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_is_observed() {
        let (signal, guard) = ShutdownSignal::new();
        assert!(!guard.should_shutdown());
        signal.trigger();
        assert!(guard.should_shutdown());
    }
}
