//! Low-level spawn primitives. The supervised task *set* (tracking handles,
//! graceful shutdown with a grace period) lives in the `mmb_task` crate;
//! this module only wraps `tokio::spawn` with panic-to-log behavior applied
//! at every spawn site.

use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tokio::task::JoinHandle;

/// Spawns `future`, logging (rather than silently dropping) any panic it
/// raises. Every task in this workspace is spawned through this function or
/// [`spawn_future_ok`] instead of bare `tokio::spawn`, so a panicking
/// connector task shows up in logs instead of vanishing.
pub fn spawn_future<F>(action_name: &str, future: F) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let action_name = action_name.to_string();
    tokio::spawn(async move {
        match AssertUnwindSafe(future).catch_unwind().await {
            Ok(()) => {}
            Err(panic) => {
                log::error!("action {action_name} panicked: {}", describe_panic(&panic));
            }
        }
    })
}

/// Like [`spawn_future`] but for futures that return a `Result`, logging the
/// `Err` at `error` level instead of discarding it.
pub fn spawn_future_ok<F, E>(action_name: &str, future: F) -> JoinHandle<()>
where
    F: Future<Output = Result<(), E>> + Send + 'static,
    E: std::fmt::Debug,
{
    let action_name_owned = action_name.to_string();
    spawn_future(action_name, async move {
        if let Err(err) = future.await {
            log::error!("action {action_name_owned} returned an error: {err:?}");
        }
    })
}

fn describe_panic(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn spawn_future_runs_to_completion() {
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = ran.clone();
        spawn_future("test", async move {
            ran2.store(true, Ordering::SeqCst);
        })
        .await
        .unwrap();
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn spawn_future_survives_panic() {
        let handle = spawn_future("panicking", async move {
            panic!("boom");
        });
        // should complete with Ok(()) from the spawned task's perspective —
        // the panic is caught inside the future, not propagated to the JoinHandle.
        handle.await.unwrap();
    }
}
