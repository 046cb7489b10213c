//! Single-consumer task queue.
//!
//! A [`SerialQueue`] owns one background task that runs enqueued jobs strictly
//! one at a time, in enqueue order. The manager uses two of them: the worker,
//! on which every protocol call runs, and the delivery queue, on which every
//! completion and observer callback runs.
//!
//! Ordering, not just mutual exclusion, is the contract: a job never starts
//! before the previous one has finished.

use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tracing::{debug, error};

type Job = BoxFuture<'static, ()>;

/// Handle to a serial queue. Clones feed the same background task.
///
/// The task stops once every handle is dropped and the backlog has drained.
#[derive(Clone)]
pub(crate) struct SerialQueue {
    name: &'static str,
    tx: mpsc::UnboundedSender<Job>,
}

impl SerialQueue {
    /// Spawn the consumer task on the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub(crate) fn spawn(name: &'static str) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();

        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                // A panicking job must not take the rest of the queue with it
                if AssertUnwindSafe(job).catch_unwind().await.is_err() {
                    error!("{} queue job panicked", name);
                }
            }
            debug!("{} queue stopped", name);
        });

        Self { name, tx }
    }

    /// Append a job. Returns false if the consumer task is gone.
    pub(crate) fn enqueue<F>(&self, job: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let accepted = self.tx.send(Box::pin(job)).is_ok();
        if !accepted {
            debug!("{} queue is closed, dropping job", self.name);
        }
        accepted
    }

    /// Append a synchronous closure.
    pub(crate) fn enqueue_fn<F>(&self, f: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.enqueue(async move { f() })
    }
}
