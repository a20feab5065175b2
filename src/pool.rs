//! Bounded fan-out / fan-in of probe tasks.
//!
//! Every probe runs as its own tokio task on the shared runtime. A semaphore
//! permit (the ticket) is acquired *before* a task is spawned, so a saturated
//! pool stalls the launcher instead of opening more sockets. The permit moves
//! into the task and is released when the task ends, whichever way it ends.
//!
//! The semaphore only bounds concurrency. Completion is tracked separately by
//! a `JoinSet`: the result channel closes once every launched task has been
//! joined, never earlier.
use std::future::Future;
use std::sync::Arc;

use log::debug;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// A concurrency ceiling plus the token that can stop a run early.
#[derive(Debug, Clone)]
pub struct TaskPool {
    concurrency: usize,
    cancel: CancellationToken,
}

impl TaskPool {
    /// A pool allowing `concurrency` probes in flight, at least one.
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
            cancel: CancellationToken::new(),
        }
    }

    /// Stops launching probes once `cancel` fires. In-flight probes are
    /// abandoned at their next await point; results already sent stay
    /// readable from the receiver.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// The configured ceiling.
    pub const fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Runs `work` for every item with at most `concurrency` in flight.
    ///
    /// Items whose work yields `Some` are delivered through the returned
    /// receiver in completion order. The receiver reports `None` once every
    /// launched task is done. Dropping the receiver stops the run the same
    /// way cancelling does. Must be called from within a tokio runtime.
    pub fn spawn_all<I, F, Fut, T>(&self, items: I, work: F) -> mpsc::Receiver<T>
    where
        I: IntoIterator,
        I::IntoIter: Send + 'static,
        I::Item: Send + 'static,
        F: Fn(I::Item) -> Fut + Send + 'static,
        Fut: Future<Output = Option<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = mpsc::channel(self.concurrency);
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let cancel = self.cancel.clone();
        let items = items.into_iter();

        tokio::spawn(async move {
            let mut tasks = JoinSet::new();
            let mut launched = 0_usize;

            for item in items {
                let permit = tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    () = tx.closed() => break,
                    permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                };

                let tx = tx.clone();
                let cancel = cancel.clone();
                let probe = work(item);
                tasks.spawn(async move {
                    let _permit = permit;
                    let outcome = tokio::select! {
                        biased;
                        () = cancel.cancelled() => None,
                        () = tx.closed() => None,
                        outcome = probe => outcome,
                    };
                    if let Some(value) = outcome {
                        // The receiver may have been dropped since.
                        let _ = tx.send(value).await;
                    }
                });
                launched += 1;

                while let Some(joined) = tasks.try_join_next() {
                    log_join_error(joined);
                }
            }

            let tx_closed = tx.is_closed();
            drop(tx);
            while let Some(joined) = tasks.join_next().await {
                log_join_error(joined);
            }
            debug!(
                "Pool drained: {launched} probes launched, cancelled: {}",
                cancel.is_cancelled() || tx_closed
            );
        });

        rx
    }
}

fn log_join_error(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        debug!("Probe task ended abnormally: {e}");
    }
}
