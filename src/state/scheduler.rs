//! Delayed one-shot tasks with cancel-by-id, driven by tokio timers so tests can run on virtual time.

use std::{
    fmt,
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use dashmap::DashMap;
use tokio::{sync::oneshot, task::AbortHandle, time::sleep};
use tracing::debug;

/// Identifier returned by [`TaskScheduler::schedule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Registry of timers that have not fired yet.
#[derive(Default)]
pub struct TaskScheduler {
    tasks: Arc<DashMap<TaskId, AbortHandle>>,
    next_id: AtomicU64,
}

impl TaskScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` once `delay` has elapsed, unless cancelled first.
    pub fn schedule<F>(&self, name: &'static str, delay: Duration, task: F) -> TaskId
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let id = TaskId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let tasks = Arc::clone(&self.tasks);
        let (registered_tx, registered_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            // The handle must be in the registry before the timer can fire and remove it.
            let _ = registered_rx.await;
            sleep(delay).await;
            if tasks.remove(&id).is_none() {
                return;
            }
            debug!(task = name, %id, "running scheduled task");
            task.await;
        });

        self.tasks.insert(id, handle.abort_handle());
        let _ = registered_tx.send(());
        id
    }

    /// Cancel a pending task. Returns `false` when it already fired or was cancelled.
    pub fn cancel(&self, id: TaskId) -> bool {
        match self.tasks.remove(&id) {
            Some((_, handle)) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Number of tasks whose timer has not fired yet.
    pub fn pending(&self) -> usize {
        self.tasks.len()
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        for entry in self.tasks.iter() {
            entry.value().abort();
        }
    }
}
