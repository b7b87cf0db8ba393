//! Periodic/cron jobs for a strategy, running on the same cooperative loop
//! as the bus. Built on the same connect-wait-sleep-repeat supervisor shape
//! `mmb_ws::WsClient` runs its reconnect loop on, and on
//! `mmb_utils::infrastructure::spawn_future` for panic-safe spawning.

use std::sync::Arc;
use std::time::Duration;

use mmb_utils::cancellation::CancellationToken2;
use mmb_utils::infrastructure::spawn_future;

/// Runs a fixed set of named jobs, each firing every `interval`
/// indefinitely until [`Scheduler::shutdown`] is called. A job runs
/// in-line on its own task rather than the bus's dispatch call stack, but
/// does not spawn a fresh OS thread or executor of its own: everything
/// still rides the same tokio runtime the bus's publishers run on.
pub struct Scheduler {
    cancellation: CancellationToken2,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Scheduler {
            cancellation: CancellationToken2::new(),
        }
    }

    /// Schedules `job` to run every `interval`, starting after the first
    /// tick (never immediately on registration, matching a cron tick
    /// rather than a run-once-then-repeat primitive).
    pub fn schedule<F>(&self, name: &str, interval: Duration, job: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let cancel = self.cancellation.child_token();
        let action_name = format!("scheduler job {name}");
        spawn_future(&action_name, async move {
            loop {
                cancel.sleep_or_cancelled(interval).await;
                if cancel.is_cancellation_requested() {
                    return;
                }
                job();
            }
        });
    }

    /// Stops every job scheduled through this instance. Jobs already
    /// mid-tick finish their current invocation before observing it.
    pub fn shutdown(&self) {
        self.cancellation.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn job_fires_repeatedly_at_the_configured_interval() {
        let scheduler = Scheduler::new();
        let ticks = Arc::new(AtomicUsize::new(0));
        let ticks2 = ticks.clone();
        scheduler.schedule("count", Duration::from_secs(1), move || {
            ticks2.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::advance(Duration::from_millis(3_500)).await;
        tokio::task::yield_now().await;

        assert_eq!(ticks.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_further_ticks() {
        let scheduler = Scheduler::new();
        let ticks = Arc::new(AtomicUsize::new(0));
        let ticks2 = ticks.clone();
        scheduler.schedule("count", Duration::from_secs(1), move || {
            ticks2.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::advance(Duration::from_millis(1_500)).await;
        tokio::task::yield_now().await;
        scheduler.shutdown();
        tokio::time::advance(Duration::from_secs(5)).await;
        tokio::task::yield_now().await;

        assert_eq!(ticks.load(Ordering::SeqCst), 1);
    }
}
