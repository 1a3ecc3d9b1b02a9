//! Median-based outlier rejection for decoded caliper readings.
use crate::config::FilterCfg;
use std::collections::VecDeque;

/// Rejects readings that stray more than `max_error_mm` from the median of the
/// last `window` accepted readings.
///
/// The window starts out as zeros and only accepted readings enter it. When
/// `reseed_after` consecutive rejected readings agree with each other, the
/// carriage has genuinely moved away from the window (e.g. a fresh window far
/// from zero), so the window is refilled with the newest reading. That reseed
/// is the one place rejected readings reach the window; `reseed_after = 0`
/// turns it off and gives a strict median filter.
#[derive(Debug, Clone)]
pub struct OutlierFilter {
    window: VecDeque<f64>,
    size: usize,
    max_error: f64,
    reseed_after: u32,
    streak: Vec<f64>,
    rejected: u64,
}

impl OutlierFilter {
    #[must_use]
    pub fn new(cfg: &FilterCfg) -> Self {
        let size = cfg.window.max(1);
        Self {
            window: std::iter::repeat_n(0.0, size).collect(),
            size,
            max_error: cfg.max_error_mm,
            reseed_after: cfg.reseed_after,
            streak: Vec::new(),
            rejected: 0,
        }
    }

    /// Accept `sample` and return it, or reject it and return `None`.
    pub fn filter(&mut self, sample: f64) -> Option<f64> {
        if !sample.is_finite() {
            self.rejected += 1;
            return None;
        }
        if (sample - self.median()).abs() <= self.max_error {
            self.streak.clear();
            self.push(sample);
            return Some(sample);
        }

        self.rejected += 1;
        if self
            .streak
            .last()
            .is_some_and(|&prev| (sample - prev).abs() > self.max_error)
        {
            self.streak.clear();
        }
        self.streak.push(sample);

        if self.reseed_after > 0 && self.streak.len() >= self.reseed_after as usize {
            tracing::debug!(
                sample,
                median = self.median(),
                rejections = self.streak.len(),
                "re-seeding outlier window"
            );
            self.streak.clear();
            self.window.iter_mut().for_each(|v| *v = sample);
            return Some(sample);
        }
        None
    }

    /// Median of the current window.
    #[must_use]
    pub fn median(&self) -> f64 {
        let mut sorted: Vec<f64> = self.window.iter().copied().collect();
        sorted.sort_by(f64::total_cmp);
        let mid = sorted.len() / 2;
        if sorted.len() % 2 == 1 {
            sorted[mid]
        } else {
            (sorted[mid - 1] + sorted[mid]) / 2.0
        }
    }

    /// Refill the window with zeros and forget any rejection streak.
    pub fn reset(&mut self) {
        self.window.iter_mut().for_each(|v| *v = 0.0);
        self.streak.clear();
    }

    /// Window contents, oldest first.
    #[must_use]
    pub fn window(&self) -> Vec<f64> {
        self.window.iter().copied().collect()
    }

    /// Readings rejected since construction.
    #[must_use]
    pub const fn rejected(&self) -> u64 {
        self.rejected
    }

    fn push(&mut self, sample: f64) {
        if self.window.len() == self.size {
            self.window.pop_front();
        }
        self.window.push_back(sample);
    }
}
