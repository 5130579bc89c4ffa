//! Deferred-work execution.
//!
//! External I/O (driver kill RPCs) never runs under the scheduler lock:
//! callers enqueue a closure and a single consumer drains the queue. The
//! closure's boolean says whether the external call should be treated as
//! confirmed; scheduler state never advances on it.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub type WorkItem = Box<dyn FnOnce() -> bool + Send>;

pub trait WorkQueue: Send + Sync {
    fn do_work(&self, work: WorkItem);
}

/// Channel-fed work queue with one consumer task.
#[derive(Debug)]
pub struct DeferredWorkQueue {
    tx: mpsc::UnboundedSender<WorkItem>,
    cancel: CancellationToken,
}

impl DeferredWorkQueue {
    /// Spawn the consumer on the current tokio runtime.
    pub fn spawn() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<WorkItem>();
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    item = rx.recv() => match item {
                        Some(work) => {
                            let confirmed = work();
                            tracing::debug!(confirmed, "deferred work item completed");
                        }
                        None => break,
                    }
                }
            }
            tracing::debug!("work queue consumer stopped");
        });

        Self { tx, cancel }
    }

    /// Stop the consumer. Items still queued are dropped.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl WorkQueue for DeferredWorkQueue {
    fn do_work(&self, work: WorkItem) {
        if self.tx.send(work).is_err() {
            tracing::error!("work queue consumer is gone; dropping work item");
        }
    }
}
