//! Scheduler.
//!
//! Callbacks run on tokio's worker pool, distinct from the pool the edge uses
//! for client-intent handlers. Cancellation is best-effort: a
//! callback that has already started executing is not interrupted, and must
//! detect for itself that it raced a cancel. The orchestrator
//! relies on this by re-reading the session under its lock before acting on
//! any fired timer.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::trace;

pub type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Opaque handle to a pending one-shot callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

/// Runs one-shot callbacks after a delay, cancellable by handle.
pub trait Scheduler: Send + Sync {
    /// Arms `callback` to run after `delay`. The returned handle may be
    /// passed to [`Scheduler::cancel`] at any point before it fires.
    fn schedule(&self, delay: Duration, callback: BoxFuture) -> TimerHandle;

    /// Best-effort cancellation. Returns `false` if the handle was
    /// already fired, already cancelled, or unknown.
    fn cancel(&self, handle: TimerHandle) -> bool;

    /// Cancels every pending callback. Used by shutdown.
    fn cancel_all(&self);
}

/// Tokio-backed scheduler. Each armed callback is a detached task racing a
/// sleep against a cancellation oneshot.
pub struct TokioScheduler {
    pending: Arc<DashMap<u64, oneshot::Sender<()>>>,
    next_id: AtomicU64,
}

impl Default for TokioScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl TokioScheduler {
    pub fn new() -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, callback: BoxFuture) -> TimerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();
        self.pending.insert(id, cancel_tx);

        let pending = self.pending.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = &mut cancel_rx => {
                    trace!(timer_id = id, "timer cancelled before firing");
                }
                _ = tokio::time::sleep(delay) => {
                    pending.remove(&id);
                    callback.await;
                }
            }
        });

        TimerHandle(id)
    }

    fn cancel(&self, handle: TimerHandle) -> bool {
        match self.pending.remove(&handle.0) {
            Some((_, tx)) => {
                let _ = tx.send(());
                true
            }
            None => false,
        }
    }

    fn cancel_all(&self) {
        let ids: Vec<u64> = self.pending.iter().map(|e| *e.key()).collect();
        for id in ids {
            self.cancel(TimerHandle(id));
        }
    }
}
