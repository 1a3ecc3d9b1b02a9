//! Small shared helpers for plate_core.
use plate_traits::Clock;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Clock handle shared between control threads and interrupt sinks.
pub type SharedClock = Arc<dyn Clock + Send + Sync>;

/// Granularity of blocking waits, so stop requests are honoured promptly.
pub const POLL_SLICE: Duration = Duration::from_millis(50);

/// Lock a mutex, recovering the data if a panicking thread poisoned it.
#[inline]
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Real-time clock wrapped for sharing.
pub fn monotonic() -> SharedClock {
    Arc::new(plate_traits::MonotonicClock::new())
}

/// Seconds to a `Duration`, treating negative and non-finite input as zero
/// and saturating at `Duration::MAX`.
#[inline]
pub fn secs(s: f64) -> Duration {
    if s.is_finite() && s > 0.0 {
        Duration::try_from_secs_f64(s).unwrap_or(Duration::MAX)
    } else {
        Duration::ZERO
    }
}
