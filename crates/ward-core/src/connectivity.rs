//! Connectivity Monitor: tracks the online/offline flag and exposes
//! transition notifications.
//!
//! There is no polling. The embedding environment (CLI flag, OS network
//! events, a browser shell) flips the flag; repositories check it before
//! every network attempt and the client triggers outbox drains on each
//! transition to online.

use tokio::sync::watch;

/// Shared online/offline flag with change notifications.
#[derive(Clone)]
pub struct ConnectivityMonitor {
    sender: watch::Sender<bool>,
}

impl ConnectivityMonitor {
    /// Create a monitor with the given initial state.
    pub fn new(initially_online: bool) -> Self {
        let (sender, _) = watch::channel(initially_online);
        Self { sender }
    }

    /// Current flag value.
    pub fn is_online(&self) -> bool {
        *self.sender.borrow()
    }

    /// Record a connectivity transition. No-op when the state is unchanged,
    /// so subscribers only wake on real transitions.
    pub fn set_online(&self, online: bool) {
        self.sender.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
    }

    /// Subscribe to flag changes.
    pub fn changes(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn transitions_are_observable() {
        let monitor = ConnectivityMonitor::new(false);
        let mut changes = monitor.changes();
        assert!(!monitor.is_online());

        monitor.set_online(true);
        changes.changed().await.unwrap();
        assert!(*changes.borrow_and_update());
        assert!(monitor.is_online());
    }

    #[tokio::test]
    async fn redundant_updates_do_not_notify() {
        let monitor = ConnectivityMonitor::new(true);
        let mut changes = monitor.changes();
        changes.borrow_and_update();

        monitor.set_online(true);
        assert!(!changes.has_changed().unwrap());
    }
}
