#![deny(
    non_ascii_idents,
    non_shorthand_field_patterns,
    path_statements,
    unused_comparisons,
    while_true,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_must_use
)]

//! Supervised background task set: a cancellation token shared with every
//! registered task, plus the `JoinHandle`s needed to await them on shutdown.

use std::future::Future;
use std::time::Duration;

use mmb_utils::cancellation::CancellationToken2;
use mmb_utils::infrastructure::spawn_future;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

/// Default bound on how long shutdown waits for cooperative tasks to finish
/// before dropping their handles.
pub const DEFAULT_SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Owns a set of supervised tasks and the cancellation token handed to each
/// of them. `create_task` registers a task; `shutdown` cancels them all
/// cooperatively and awaits each with a bounded grace period, dropping
/// survivors.
pub struct TaskManager {
    cancellation_token: CancellationToken2,
    handles: Mutex<Vec<JoinHandle<()>>>,
    grace_period: Duration,
}

impl TaskManager {
    pub fn new() -> Self {
        Self::with_grace_period(DEFAULT_SHUTDOWN_GRACE_PERIOD)
    }

    pub fn with_grace_period(grace_period: Duration) -> Self {
        TaskManager {
            cancellation_token: CancellationToken2::new(),
            handles: Mutex::new(Vec::new()),
            grace_period,
        }
    }

    pub fn stop_token(&self) -> CancellationToken2 {
        self.cancellation_token.clone()
    }

    /// Registers a task built from `factory`, which receives a child
    /// cancellation token so the task can observe shutdown without reaching
    /// back into the manager. Panics inside `future` are caught and logged
    /// by [`mmb_utils::infrastructure::spawn_future`], never propagated to
    /// the process.
    pub fn create_task<F, Fut>(&self, name: &str, factory: F)
    where
        F: FnOnce(CancellationToken2) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let child_token = self.cancellation_token.child_token();
        let future = factory(child_token);
        let handle = spawn_future(name, future);
        self.handles.lock().push(handle);
    }

    /// Cancels every registered task, then waits up to the configured grace
    /// period for them to finish; any still running after that are aborted
    /// and dropped.
    pub async fn shutdown(&self) {
        self.cancellation_token.cancel();
        let handles = std::mem::take(&mut *self.handles.lock());
        let all_done = futures::future::join_all(handles.into_iter().map(|handle| async move {
            let _ = handle.await;
        }));
        if tokio::time::timeout(self.grace_period, all_done).await.is_err() {
            log::warn!("task manager shutdown grace period elapsed; remaining tasks dropped");
        }
    }

    /// Blocks forever, for the strategy host's main loop — returns only
    /// once [`Self::stop_token`] is cancelled.
    pub async fn wait_forever(&self) {
        self.cancellation_token.when_cancelled().await;
    }
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn create_task_runs_and_observes_cancellation() {
        let manager = TaskManager::new();
        let observed_cancel = Arc::new(AtomicUsize::new(0));
        let observed_cancel2 = observed_cancel.clone();
        manager.create_task("observer", move |token| async move {
            token.when_cancelled().await;
            observed_cancel2.fetch_add(1, Ordering::SeqCst);
        });
        manager.shutdown().await;
        assert_eq!(observed_cancel.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn wait_forever_returns_after_shutdown_signal() {
        let manager = Arc::new(TaskManager::new());
        let manager2 = manager.clone();
        let handle = tokio::spawn(async move { manager2.wait_forever().await });
        manager.stop_token().cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("wait_forever should return promptly after cancellation")
            .unwrap();
    }
}
