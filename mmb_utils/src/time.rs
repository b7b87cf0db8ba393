//! Monotonic wall-clock in milliseconds and the atomic counters used to
//! seed unique ids.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::DateTime;

/// Current wall-clock time since the UNIX epoch, in whole milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before UNIX_EPOCH")
        .as_millis() as u64
}

pub fn ms_to_date_time(ms: u64) -> DateTime {
    (UNIX_EPOCH + Duration::from_millis(ms)).into()
}

/// Seeds a counter-based id generator with the current UNIX time in seconds,
/// so ids generated across process restarts keep trending upward.
pub fn atomic_current_secs() -> AtomicU64 {
    AtomicU64::new(
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock is before UNIX_EPOCH")
            .as_secs(),
    )
}

pub trait ToStdExpected {
    fn to_std_expected(&self) -> Duration;
}

impl ToStdExpected for chrono::Duration {
    /// Panics only if `self` is negative, which would never happen for the
    /// durations this crate converts (reconnect backoff, TWAP wait).
    fn to_std_expected(&self) -> Duration {
        self.to_std()
            .unwrap_or_else(|err| panic!("negative duration {self}: {err:?}"))
    }
}

static COUNTER: std::sync::atomic::AtomicU64 = AtomicU64::new(0);

/// Monotonically increasing counter, reset each process start. Combined with
/// [`now_ms`] by callers that need a tie-breaker for same-millisecond events.
pub fn next_sequence() -> u64 {
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_ms_round_trips_through_date_time() {
        let ms = now_ms();
        let dt = ms_to_date_time(ms);
        assert_eq!(dt.timestamp_millis() as u64, ms);
    }

    #[test]
    fn sequence_is_monotonic() {
        let a = next_sequence();
        let b = next_sequence();
        assert!(b > a);
    }
}
