//! Cooperative cancellation, built as a thin wrapper around
//! `tokio_util::sync::CancellationToken`.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::time::ToStdExpected;

/// A cloneable handle passed down into every spawned task and connector so
/// shutdown can be requested once and observed everywhere, without each
/// component owning its own shutdown channel.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken2(CancellationToken);

impl CancellationToken2 {
    pub fn new() -> Self {
        Self(CancellationToken::new())
    }

    pub fn child_token(&self) -> Self {
        Self(self.0.child_token())
    }

    pub fn cancel(&self) {
        self.0.cancel();
    }

    pub fn is_cancellation_requested(&self) -> bool {
        self.0.is_cancelled()
    }

    pub async fn when_cancelled(&self) {
        self.0.cancelled().await;
    }

    /// Waits for cancellation or `duration` to elapse, whichever comes first.
    /// Used by reconnect/backoff loops that must still wake up promptly on
    /// shutdown instead of riding out a full sleep.
    pub async fn sleep_or_cancelled(&self, duration: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {},
            _ = self.when_cancelled() => {},
        }
    }

    /// Same as [`Self::sleep_or_cancelled`] but takes a `chrono::Duration`,
    /// as most of this workspace's call sites compute durations that way.
    pub async fn sleep_chrono_or_cancelled(&self, duration: chrono::Duration) {
        self.sleep_or_cancelled(duration.to_std_expected()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn child_token_cancels_with_parent() {
        let parent = CancellationToken2::new();
        let child = parent.child_token();
        assert!(!child.is_cancellation_requested());
        parent.cancel();
        child.when_cancelled().await;
        assert!(child.is_cancellation_requested());
    }

    #[tokio::test]
    async fn sleep_or_cancelled_returns_early_on_cancel() {
        let token = CancellationToken2::new();
        let token2 = token.clone();
        tokio::spawn(async move {
            token2.cancel();
        });
        token.sleep_or_cancelled(Duration::from_secs(60)).await;
        assert!(token.is_cancellation_requested());
    }
}
