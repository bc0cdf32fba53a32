//! Task spawning abstraction and outbound-callback dispatch.
//!
//! This module provides a [`TaskSpawner`] trait that allows the core library
//! to spawn background tasks without being tied to a specific async runtime,
//! and the [`CallbackDispatcher`], a serialized single-worker executor that
//! delivers outbound callbacks to remote listeners.
//!
//! Every aggregate that notifies external parties (zone arbiters, the event
//! fan-out, the ducking and muting services, the media request broker) owns
//! one dispatcher. Callbacks are only ever invoked from dispatcher jobs,
//! after the enqueuing aggregate has released its internal locks, and jobs
//! for one dispatcher run strictly in enqueue order. That gives per-zone and
//! per-group total ordering without holding a lock across a remote call.

use std::future::Future;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Abstraction for spawning background tasks.
///
/// Allows core services to spawn asynchronous work without knowing the
/// underlying runtime. Implementations should ensure tasks are properly
/// tracked and can complete even if the spawner is dropped.
pub trait TaskSpawner: Send + Sync {
    /// Spawns a future as a background task.
    ///
    /// The task runs independently of the caller and will continue until
    /// completion. The spawner does not provide a way to cancel or join
    /// the spawned task.
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static;
}

/// Tokio-based spawner for the host service and general use.
#[derive(Clone)]
pub struct TokioSpawner {
    handle: tokio::runtime::Handle,
}

impl TokioSpawner {
    /// Creates a new `TokioSpawner` with the given runtime handle.
    #[must_use]
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Creates a new `TokioSpawner` using the current runtime's handle.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime context.
    #[must_use]
    pub fn current() -> Self {
        Self {
            handle: tokio::runtime::Handle::current(),
        }
    }
}

impl TaskSpawner for TokioSpawner {
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(future);
    }
}

/// A unit of outbound callback work.
type DispatchJob = Box<dyn FnOnce() + Send>;

enum DispatchMode {
    /// Jobs run on a dedicated worker task, strictly in enqueue order.
    Serial { tx: mpsc::UnboundedSender<DispatchJob> },
    /// Jobs run on the calling thread, immediately. Test-only determinism.
    Inline,
}

/// Serialized executor for outbound callbacks.
///
/// Cloning yields another handle to the same worker; ordering is preserved
/// across clones because all handles feed one queue.
#[derive(Clone)]
pub struct CallbackDispatcher {
    name: &'static str,
    mode: std::sync::Arc<DispatchMode>,
}

impl CallbackDispatcher {
    /// Creates a dispatcher backed by a dedicated worker task.
    ///
    /// The worker drains jobs until the cancellation token fires or every
    /// handle is dropped. Jobs still queued at cancellation are discarded.
    pub fn serial(spawner: &TokioSpawner, cancel: CancellationToken, name: &'static str) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<DispatchJob>();
        spawner.spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    job = rx.recv() => match job {
                        Some(job) => job(),
                        None => break,
                    },
                }
            }
        });
        Self {
            name,
            mode: std::sync::Arc::new(DispatchMode::Serial { tx }),
        }
    }

    /// Creates a dispatcher that runs jobs synchronously on the caller.
    ///
    /// Used by tests to observe callback effects without awaiting the
    /// worker task. Callers must still enqueue only after releasing locks;
    /// inline mode executes the job in the same stack frame.
    #[must_use]
    pub fn inline(name: &'static str) -> Self {
        Self {
            name,
            mode: std::sync::Arc::new(DispatchMode::Inline),
        }
    }

    /// Enqueues a callback job.
    ///
    /// Must not be called while holding any aggregate lock; the job may run
    /// synchronously in inline mode.
    pub fn dispatch<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        match &*self.mode {
            DispatchMode::Serial { tx } => {
                if tx.send(Box::new(job)).is_err() {
                    log::warn!(
                        "[CallbackDispatcher] {}: job dropped after shutdown",
                        self.name
                    );
                }
            }
            DispatchMode::Inline => job(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn tokio_spawner_executes_task() {
        let spawner = TokioSpawner::current();
        let executed = Arc::new(AtomicUsize::new(0));
        let executed_clone = executed.clone();

        spawner.spawn(async move {
            executed_clone.store(1, Ordering::SeqCst);
        });

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        assert_eq!(executed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn serial_dispatcher_preserves_enqueue_order() {
        let spawner = TokioSpawner::current();
        let dispatcher =
            CallbackDispatcher::serial(&spawner, CancellationToken::new(), "test");
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        for value in 0..16 {
            let order = Arc::clone(&order);
            dispatcher.dispatch(move || order.lock().push(value));
        }

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert_eq!(*order.lock(), (0..16).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn cancelled_dispatcher_drops_pending_jobs() {
        let spawner = TokioSpawner::current();
        let cancel = CancellationToken::new();
        let dispatcher = CallbackDispatcher::serial(&spawner, cancel.clone(), "test");

        cancel.cancel();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        let ran = Arc::new(AtomicUsize::new(0));
        let ran_clone = Arc::clone(&ran);
        dispatcher.dispatch(move || {
            ran_clone.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn inline_dispatcher_runs_synchronously() {
        let dispatcher = CallbackDispatcher::inline("test");
        let ran = Arc::new(AtomicUsize::new(0));
        let ran_clone = Arc::clone(&ran);
        dispatcher.dispatch(move || {
            ran_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
