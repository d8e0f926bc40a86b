//! Engine notifications and counters.

use parking_lot::RwLock;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::watch;

/// Notification emitted by the sync engine.
///
/// Data changes are not reported here; they go through the cache's
/// change feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A remote request for `path` finished, successfully or not.
    ReqDone {
        /// Path of the request.
        path: String,
    },
    /// No tasks are left; the cycle is complete.
    Done,
    /// The remote refused the credentials for `path`.
    Unauthorized {
        /// Path of the refused request.
        path: String,
    },
    /// The task for `path` failed and was dropped until the next cycle.
    Failed {
        /// Path of the task.
        path: String,
        /// Why it failed.
        message: String,
    },
}

/// Distributes [`SyncEvent`]s and counts completed cycles.
pub(crate) struct SyncEvents {
    subscribers: RwLock<Vec<UnboundedSender<SyncEvent>>>,
    done: watch::Sender<u64>,
}

impl SyncEvents {
    pub(crate) fn new() -> Self {
        let (done, _) = watch::channel(0);
        Self {
            subscribers: RwLock::new(Vec::new()),
            done,
        }
    }

    pub(crate) fn subscribe(&self) -> UnboundedReceiver<SyncEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Returns a receiver that observes the number of `Done` events.
    pub(crate) fn done_receiver(&self) -> watch::Receiver<u64> {
        self.done.subscribe()
    }

    pub(crate) fn emit(&self, event: SyncEvent) {
        if event == SyncEvent::Done {
            self.done.send_modify(|count| *count += 1);
        }
        self.subscribers
            .write()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// Statistics about sync operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Number of `done` events, one per drained task queue.
    pub cycles_completed: u64,
    /// Requests that reached a definite outcome.
    pub requests_completed: u64,
    /// Fetches that changed local state.
    pub fetches: u64,
    /// Completed document uploads.
    pub pushes: u64,
    /// Completed remote deletions.
    pub deletes: u64,
    /// Conflicts settled in favor of the remote value.
    pub conflicts: u64,
    /// Tasks that failed.
    pub failures: u64,
    /// Last error message.
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_in_order() {
        let events = SyncEvents::new();
        let mut rx = events.subscribe();
        let mut done = events.done_receiver();

        events.emit(SyncEvent::ReqDone { path: "/a".into() });
        events.emit(SyncEvent::Done);

        assert_eq!(rx.recv().await.unwrap(), SyncEvent::ReqDone { path: "/a".into() });
        assert_eq!(rx.recv().await.unwrap(), SyncEvent::Done);
        assert_eq!(*done.borrow_and_update(), 1);
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let events = SyncEvents::new();
        drop(events.subscribe());
        events.emit(SyncEvent::Done);
        assert!(events.subscribers.read().is_empty());
    }
}
