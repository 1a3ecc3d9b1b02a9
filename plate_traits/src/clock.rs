use std::time::{Duration, Instant};

/// Time source for control loops, switch settling and homing timeouts.
///
/// Everything that waits or timestamps goes through this trait so tests can
/// replace wall time with [`test_clock::TestClock`].
pub trait Clock {
    fn now(&self) -> Instant;
    /// Block for `d`; a manual clock advances instead.
    fn sleep(&self, d: Duration);

    /// Whole milliseconds since `epoch`; 0 if `epoch` lies in the future.
    fn ms_since(&self, epoch: Instant) -> u64 {
        u64::try_from(self.now().saturating_duration_since(epoch).as_millis()).unwrap_or(u64::MAX)
    }

    fn secs_since(&self, epoch: Instant) -> f64 {
        self.now().saturating_duration_since(epoch).as_secs_f64()
    }
}

/// Wall clock: `Instant::now` and `thread::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl MonotonicClock {
    #[inline]
    pub fn new() -> Self {
        Self
    }
}

impl Clock for MonotonicClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, d: Duration) {
        if !d.is_zero() {
            std::thread::sleep(d);
        }
    }
}

/// Manually driven clock shared by the unit tests of downstream crates.
pub mod test_clock {
    use super::Clock;
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};

    /// `now()` is a fixed origin plus an offset that only `advance` and
    /// `sleep` move. Clones share the offset.
    #[derive(Debug, Clone)]
    pub struct TestClock {
        origin: Instant,
        elapsed: Arc<Mutex<Duration>>,
    }

    impl Default for TestClock {
        fn default() -> Self {
            Self::new()
        }
    }

    impl TestClock {
        pub fn new() -> Self {
            Self {
                origin: Instant::now(),
                elapsed: Arc::new(Mutex::new(Duration::ZERO)),
            }
        }

        pub fn advance(&self, d: Duration) {
            let mut e = self.elapsed.lock().unwrap_or_else(|p| p.into_inner());
            *e = e.saturating_add(d);
        }

        /// The instant `secs` after the origin, independent of the current offset.
        pub fn at_secs(&self, secs: f64) -> Instant {
            self.origin + Duration::from_secs_f64(secs)
        }
    }

    impl Clock for TestClock {
        fn now(&self) -> Instant {
            self.origin + *self.elapsed.lock().unwrap_or_else(|p| p.into_inner())
        }

        fn sleep(&self, d: Duration) {
            self.advance(d);
        }
    }
}
