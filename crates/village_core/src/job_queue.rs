/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Strict FIFO serializer for async jobs.
//!
//! Offer/answer negotiation on one peer connection is not re-entrant, so every
//! mutating operation goes through a [`JobQueue`]: jobs are handed to a single
//! worker task over a channel and run one at a time in submission order. Each
//! caller gets its own job's result back over a oneshot.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("job queue closed")]
    Closed,
    #[error("job aborted before completing")]
    Aborted,
}

/// A queued job. Called with `true` when it must settle as cancelled
/// without running its body.
type QueuedJob = Box<dyn FnOnce(bool) -> BoxFuture<'static, ()> + Send>;

pub struct JobQueue {
    tx: mpsc::UnboundedSender<QueuedJob>,
    closed: Arc<AtomicBool>,
    pending: Arc<AtomicUsize>,
}

impl JobQueue {
    /// Spawns the drain worker; must be called inside a tokio runtime.
    pub fn new() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<QueuedJob>();
        let closed = Arc::new(AtomicBool::new(false));
        let pending = Arc::new(AtomicUsize::new(0));

        {
            let closed = closed.clone();
            let pending = pending.clone();
            tokio::spawn(async move {
                while let Some(job) = rx.recv().await {
                    let cancelled = closed.load(Ordering::Acquire);
                    if AssertUnwindSafe(job(cancelled)).catch_unwind().await.is_err() {
                        warn!("queued job panicked");
                    }
                    pending.fetch_sub(1, Ordering::AcqRel);
                }
                debug!("job queue drained and dropped");
            });
        }

        Self {
            tx,
            closed,
            pending,
        }
    }

    /// Enqueues `job` immediately and returns a future for its outcome.
    ///
    /// The job is placed at the tail before this function returns, so the
    /// order of `add_job` calls is the execution order even if the returned
    /// futures are awaited in a different order (or not at all).
    pub fn add_job<T, E, F, Fut>(&self, job: F) -> impl Future<Output = Result<T, E>> + Send
    where
        T: Send + 'static,
        E: From<QueueError> + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let (resp_tx, resp_rx) = oneshot::channel::<Result<T, E>>();
        let queued: QueuedJob = Box::new(move |cancelled| {
            if cancelled {
                let _ = resp_tx.send(Err(QueueError::Closed.into()));
                return futures_util::future::ready(()).boxed();
            }
            async move {
                let out = job().await;
                let _ = resp_tx.send(out);
            }
            .boxed()
        });

        let rejected = if self.closed.load(Ordering::Acquire) {
            Some(queued)
        } else {
            self.pending.fetch_add(1, Ordering::AcqRel);
            match self.tx.send(queued) {
                Ok(()) => None,
                Err(e) => {
                    self.pending.fetch_sub(1, Ordering::AcqRel);
                    Some(e.0)
                }
            }
        };

        async move {
            if let Some(job) = rejected {
                job(true).await;
            }
            match resp_rx.await {
                Ok(out) => out,
                Err(_) => Err(QueueError::Aborted.into()),
            }
        }
    }

    /// Stops running jobs: everything still queued, and everything submitted
    /// later, settles with [`QueueError::Closed`]. A job already running is
    /// left to finish.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!(pending = self.pending(), "job queue closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Jobs submitted and not yet settled, including the one running.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}
