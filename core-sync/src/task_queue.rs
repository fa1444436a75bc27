//! Per-key serialized task execution.
//!
//! Tasks sharing a key run one at a time in enqueue order; tasks under
//! different keys run concurrently. Each key keeps a chain of oneshot
//! channels: a task waits for its predecessor's sender to drop, runs, then
//! drops its own sender to release the successor. A failing or panicking
//! task therefore never blocks the tasks queued behind it.

use crate::error::{Result, SyncError};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::trace;

#[derive(Default)]
struct KeyChain {
    tail: Option<oneshot::Receiver<()>>,
    pending: usize,
}

#[derive(Default)]
struct QueueState {
    chains: HashMap<String, KeyChain>,
}

/// Cloneable handle to a keyed FIFO executor.
#[derive(Clone, Default)]
pub struct KeyedTaskQueue {
    state: Arc<Mutex<QueueState>>,
}

/// Completion handle for a queued task.
///
/// Dropping the handle does not cancel the task.
pub struct TaskHandle<T> {
    key: String,
    handle: JoinHandle<Result<T>>,
}

impl<T> TaskHandle<T> {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Abort the task. Successors still run.
    pub fn abort(&self) {
        self.handle.abort();
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let key = self.key.clone();
        Pin::new(&mut self.handle).poll(cx).map(|joined| match joined {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => {
                Err(SyncError::TaskAborted(format!("task for {} was aborted", key)))
            }
            Err(e) => Err(SyncError::TaskAborted(format!(
                "task for {} panicked: {}",
                key, e
            ))),
        })
    }
}

/// Decrements the key's pending count however the task ends.
struct PendingGuard {
    state: Arc<Mutex<QueueState>>,
    key: String,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        let mut state = lock(&self.state);
        if let Some(chain) = state.chains.get_mut(&self.key) {
            chain.pending = chain.pending.saturating_sub(1);
        }
    }
}

// A panic while holding the lock cannot leave the map half-updated, so a
// poisoned lock is still usable.
fn lock(state: &Mutex<QueueState>) -> MutexGuard<'_, QueueState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl KeyedTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `task` behind every task previously enqueued under `key`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn enqueue<F, Fut, T>(&self, key: impl Into<String>, task: F) -> TaskHandle<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let key = key.into();
        let (release, next_tail) = oneshot::channel::<()>();

        let previous = {
            let mut state = lock(&self.state);
            let chain = state.chains.entry(key.clone()).or_default();
            chain.pending += 1;
            trace!(key = %key, pending = chain.pending, "Task enqueued");
            chain.tail.replace(next_tail)
        };

        let guard = PendingGuard {
            state: Arc::clone(&self.state),
            key: key.clone(),
        };

        let handle = tokio::spawn(async move {
            let _guard = guard;
            let _release = release;
            if let Some(previous) = previous {
                // Err means the predecessor finished and dropped its sender
                let _ = previous.await;
            }
            task().await
        });

        TaskHandle { key, handle }
    }

    /// Tasks queued or running under `key`.
    pub fn pending_count(&self, key: &str) -> usize {
        lock(&self.state)
            .chains
            .get(key)
            .map_or(0, |chain| chain.pending)
    }

    pub fn total_pending_count(&self) -> usize {
        lock(&self.state).chains.values().map(|c| c.pending).sum()
    }

    /// Number of keys currently tracked, idle or not.
    pub fn key_count(&self) -> usize {
        lock(&self.state).chains.len()
    }

    /// Forget keys with no queued or running task. Returns how many were
    /// removed.
    pub fn prune_idle(&self) -> usize {
        let mut state = lock(&self.state);
        let before = state.chains.len();
        state.chains.retain(|_, chain| chain.pending > 0);
        before - state.chains.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::Notify;

    #[tokio::test]
    async fn test_same_key_runs_in_enqueue_order() {
        let queue = KeyedTaskQueue::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for (i, delay) in [30u64, 10, 0].into_iter().enumerate() {
            let log = Arc::clone(&log);
            handles.push(queue.enqueue("a.md", move || async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                log.lock().unwrap().push(i);
                Ok(i)
            }));
        }

        let results: Vec<_> = futures::future::join_all(handles).await;
        assert_eq!(
            results.into_iter().map(|r| r.unwrap()).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block_each_other() {
        let queue = KeyedTaskQueue::new();
        let gate = Arc::new(Notify::new());

        let blocked_gate = Arc::clone(&gate);
        let blocked = queue.enqueue("slow.md", move || async move {
            blocked_gate.notified().await;
            Ok("slow")
        });

        let free = queue.enqueue("fast.md", || async { Ok("fast") });
        assert_eq!(
            tokio::time::timeout(Duration::from_secs(1), free)
                .await
                .unwrap()
                .unwrap(),
            "fast"
        );
        assert_eq!(queue.pending_count("slow.md"), 1);

        gate.notify_one();
        assert_eq!(blocked.await.unwrap(), "slow");
    }

    #[tokio::test]
    async fn test_failure_does_not_block_successor() {
        let queue = KeyedTaskQueue::new();

        let failing = queue.enqueue("a.md", || async {
            Err::<(), _>(SyncError::transfer("a.md", "boom"))
        });
        let next = queue.enqueue("a.md", || async { Ok(7) });

        assert!(matches!(
            failing.await,
            Err(SyncError::TransferFailed { .. })
        ));
        assert_eq!(next.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_panic_surfaces_as_aborted_and_releases_chain() {
        let queue = KeyedTaskQueue::new();

        let panicking = queue.enqueue("a.md", || async {
            if true {
                panic!("task exploded");
            }
            Ok(())
        });
        let next = queue.enqueue("a.md", || async { Ok("after") });

        assert!(matches!(panicking.await, Err(SyncError::TaskAborted(_))));
        assert_eq!(next.await.unwrap(), "after");
    }

    #[tokio::test]
    async fn test_pending_counts_and_prune() {
        let queue = KeyedTaskQueue::new();
        let gate = Arc::new(Notify::new());

        let g = Arc::clone(&gate);
        let first = queue.enqueue("a.md", move || async move {
            g.notified().await;
            Ok(())
        });
        let second = queue.enqueue("a.md", || async { Ok(()) });
        let other = queue.enqueue("b.md", || async { Ok(()) });

        other.await.unwrap();
        assert_eq!(queue.pending_count("a.md"), 2);
        assert_eq!(queue.total_pending_count(), 2);

        // b.md is idle, a.md is not
        assert_eq!(queue.prune_idle(), 1);
        assert_eq!(queue.key_count(), 1);

        gate.notify_one();
        first.await.unwrap();
        second.await.unwrap();
        assert_eq!(queue.total_pending_count(), 0);
        assert_eq!(queue.prune_idle(), 1);
        assert_eq!(queue.key_count(), 0);
    }
}
