//! Async token bucket rate limiter, pulled out as a reusable primitive so
//! the same token bucket can be shared by WS subscribe traffic and REST
//! request traffic alike.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

struct State {
    tokens: f64,
    last_refill: Instant,
}

/// A token bucket with capacity `burst` and a fixed refill rate of one token
/// every `period`. Cloning shares the same underlying bucket, so a limiter
/// can be handed to every task issuing requests against a given venue.
#[derive(Clone)]
pub struct RateLimiter {
    state: Arc<Mutex<State>>,
    burst: f64,
    period: Duration,
}

impl RateLimiter {
    pub fn new(burst: u32, period: Duration) -> Self {
        let burst = burst.max(1) as f64;
        Self {
            state: Arc::new(Mutex::new(State {
                tokens: burst,
                last_refill: Instant::now(),
            })),
            burst,
            period,
        }
    }

    /// Single in-flight request per `period`: burst of 1 with a fixed
    /// refill rate.
    pub fn one_per(period: Duration) -> Self {
        Self::new(1, period)
    }

    fn refill(&self, state: &mut State) {
        let elapsed = state.last_refill.elapsed();
        let refilled = elapsed.as_secs_f64() / self.period.as_secs_f64();
        if refilled > 0.0 {
            state.tokens = (state.tokens + refilled).min(self.burst);
            state.last_refill = Instant::now();
        }
    }

    /// Blocks until a token is available, then consumes one.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock();
                self.refill(&mut state);
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    None
                } else {
                    let deficit = 1.0 - state.tokens;
                    Some(self.period.mul_f64(deficit))
                }
            };
            match wait {
                None => return,
                Some(duration) => tokio::time::sleep(duration).await,
            }
        }
    }

    /// Non-blocking variant: returns `true` and consumes a token if one was
    /// immediately available, `false` otherwise.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        self.refill(&mut state);
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn try_acquire_respects_burst() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[tokio::test]
    async fn acquire_waits_for_refill() {
        let limiter = RateLimiter::one_per(Duration::from_millis(20));
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(10));
    }
}
