//! Arrival detection: the position must stay inside the error band
//! continuously for the settling time.
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settling {
    Outside,
    /// Just entered the band; the timer starts now.
    Entered,
    /// Inside the band, timer running.
    Holding,
    Settled,
}

#[derive(Debug, Clone)]
pub struct SettleTracker {
    margin: f64,
    settle: Duration,
    since: Option<Instant>,
}

impl SettleTracker {
    #[must_use]
    pub const fn new(margin: f64, settle: Duration) -> Self {
        Self {
            margin,
            settle,
            since: None,
        }
    }

    pub fn observe(&mut self, error: f64, now: Instant) -> Settling {
        if error.abs() >= self.margin {
            if self.since.take().is_some() {
                tracing::trace!(error, "left error band; settling reset");
            }
            return Settling::Outside;
        }
        match self.since {
            None => {
                self.since = Some(now);
                Settling::Entered
            }
            Some(t) if now.saturating_duration_since(t) > self.settle => Settling::Settled,
            Some(_) => Settling::Holding,
        }
    }

    /// Instant the current in-band stretch began.
    #[must_use]
    pub const fn since(&self) -> Option<Instant> {
        self.since
    }

    pub fn reset(&mut self) {
        self.since = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plate_traits::test_clock::TestClock;

    #[test]
    fn settles_from_second_entry() {
        let clock = TestClock::new();
        let mut s = SettleTracker::new(0.1, Duration::from_millis(300));
        let trace = [
            (0.00, 1.00),
            (0.10, 0.05),
            (0.20, 0.50),
            (0.30, 0.05),
            (0.45, 0.02),
            (0.55, -0.03),
            (0.65, 0.01),
            (0.70, 0.00),
        ];
        let mut settled_at = Vec::new();
        let mut entries = Vec::new();
        for (t, err) in trace {
            match s.observe(err, clock.at_secs(t)) {
                Settling::Settled => settled_at.push(t),
                Settling::Entered => entries.push(t),
                _ => {}
            }
            if !settled_at.is_empty() {
                break;
            }
        }
        assert_eq!(entries, vec![0.10, 0.30]);
        // timed from the first entry it would have settled at 0.45
        assert_eq!(settled_at, vec![0.65]);
    }

    #[test]
    fn margin_is_exclusive() {
        let clock = TestClock::new();
        let mut s = SettleTracker::new(0.1, Duration::ZERO);
        assert_eq!(s.observe(0.1, clock.at_secs(0.0)), Settling::Outside);
        assert_eq!(s.observe(-0.09, clock.at_secs(0.1)), Settling::Entered);
        assert_eq!(s.observe(0.0, clock.at_secs(0.2)), Settling::Settled);
    }

    #[test]
    fn reset_restarts_timer() {
        let clock = TestClock::new();
        let mut s = SettleTracker::new(0.1, Duration::from_millis(100));
        s.observe(0.0, clock.at_secs(0.0));
        s.reset();
        assert!(s.since().is_none());
        assert_eq!(s.observe(0.0, clock.at_secs(0.5)), Settling::Entered);
    }
}
