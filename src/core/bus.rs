use flume::{Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

/// Notifications sent from the worker back to the shell.
///
/// Each one is edge-triggered and carries no data; the shell re-reads the
/// buffers through `row_count` / `entry_at` when it receives one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerToUi {
    /// The publish loop saw the middleware shut down and exited.
    Stopped,
    /// A new entry was appended to the self log.
    LogUpdated,
    /// A new entry was appended to the listen log.
    ListenLogUpdated,
}

/// Receiving side of the worker notifications, handed to the shell.
///
/// The channel is unbounded. While a session runs it gains one
/// notification per tick and one per message heard, so keep draining it or
/// drop it; once dropped, notifications are discarded.
#[derive(Debug, Clone)]
pub struct Bus {
    pub worker_rx: Receiver<WorkerToUi>,
}

impl Bus {
    pub fn new(worker_rx: Receiver<WorkerToUi>) -> Self {
        Self { worker_rx }
    }

    /// Create the channel pair used between a worker and its shell.
    pub fn channel() -> (Sender<WorkerToUi>, Self) {
        let (tx, rx) = flume::unbounded();
        (tx, Self::new(rx))
    }

    /// Wait for the next notification.
    ///
    /// Returns `Ok(None)` on timeout and an error once every sender is gone.
    pub fn next_timeout(&self, timeout: Duration) -> Result<Option<WorkerToUi>, flume::RecvError> {
        match self.worker_rx.recv_timeout(timeout) {
            Ok(event) => Ok(Some(event)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(flume::RecvError::Disconnected),
        }
    }

    /// Take every notification queued so far without blocking.
    pub fn drain(&self) -> Vec<WorkerToUi> {
        self.worker_rx.try_iter().collect()
    }
}
