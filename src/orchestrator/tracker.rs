//! Supervisor for in-flight generation tasks.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How long `shutdown` waits for cancelled tasks before aborting them.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Owns the join handles of background tasks and a root cancellation token
/// every task's own token derives from.
pub struct TaskTracker {
    root: CancellationToken,
    next_id: AtomicU64,
    tasks: Mutex<HashMap<u64, (String, JoinHandle<()>)>>,
    grace: Duration,
}

impl Default for TaskTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskTracker {
    pub fn new() -> Self {
        Self {
            root: CancellationToken::new(),
            next_id: AtomicU64::new(1),
            tasks: Mutex::new(HashMap::new()),
            grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    fn tasks(&self) -> MutexGuard<'_, HashMap<u64, (String, JoinHandle<()>)>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn `make(token)` and keep its handle. `token` is cancelled when the
    /// tracker shuts down. Returns the task id.
    pub fn spawn<F, Fut>(&self, name: impl Into<String>, make: F) -> u64
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = tokio::spawn(make(self.root.child_token()));

        let mut tasks = self.tasks();
        tasks.retain(|_, (_, handle)| !handle.is_finished());
        tasks.insert(id, (name.into(), handle));
        id
    }

    /// Number of tasks still running.
    pub fn active(&self) -> usize {
        let mut tasks = self.tasks();
        tasks.retain(|_, (_, handle)| !handle.is_finished());
        tasks.len()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.root.is_cancelled()
    }

    /// Cancel every task, wait up to the grace period, abort the rest.
    pub async fn shutdown(&self) {
        self.root.cancel();
        let tasks: Vec<_> = self.tasks().drain().collect();
        if tasks.is_empty() {
            return;
        }
        info!(tasks = tasks.len(), "Waiting for generation tasks to stop");

        let deadline = tokio::time::Instant::now() + self.grace;
        for (id, (name, mut handle)) in tasks {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) if e.is_panic() => {
                    warn!(task_id = id, task = %name, "Task panicked during shutdown");
                }
                Ok(Err(_)) => {}
                Err(_) => {
                    warn!(task_id = id, task = %name, "Task ignored cancellation, aborting");
                    handle.abort();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    #[tokio::test]
    async fn test_finished_tasks_are_pruned() {
        let tracker = TaskTracker::new();
        tracker.spawn("quick", |_| async {});
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(tracker.active(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_cooperative_tasks() {
        let tracker = TaskTracker::new();
        let stopped = Arc::new(AtomicBool::new(false));
        let flag = stopped.clone();
        tracker.spawn("cooperative", move |token| async move {
            token.cancelled().await;
            flag.store(true, Ordering::SeqCst);
        });
        assert_eq!(tracker.active(), 1);

        tracker.shutdown().await;
        assert!(stopped.load(Ordering::SeqCst));
        assert!(tracker.is_shutting_down());
        assert_eq!(tracker.active(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_aborts_stubborn_tasks_after_grace() {
        let tracker = TaskTracker::new().with_grace(Duration::from_millis(100));
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        tracker.spawn("stubborn", move |_| async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            flag.store(true, Ordering::SeqCst);
        });

        let started = tokio::time::Instant::now();
        tracker.shutdown().await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_tasks_spawned_after_shutdown_start_cancelled() {
        let tracker = TaskTracker::new();
        tracker.shutdown().await;
        let (tx, rx) = tokio::sync::oneshot::channel();
        tracker.spawn("late", move |token| async move {
            let _ = tx.send(token.is_cancelled());
        });
        assert!(rx.await.unwrap());
    }
}
