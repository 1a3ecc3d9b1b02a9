//! Position PID producing a signed step frequency.
use crate::config::PidGains;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct Pid {
    gains: PidGains,
    integral: f64,
    prev_error: Option<f64>,
    last: Option<Instant>,
    /// Bound on the integral term's contribution (anti-windup).
    output_limit: f64,
}

impl Pid {
    #[must_use]
    pub const fn new(gains: PidGains, output_limit: f64) -> Self {
        Self {
            gains,
            integral: 0.0,
            prev_error: None,
            last: None,
            output_limit,
        }
    }

    /// Feed one error sample taken at `now`; returns the controller output.
    ///
    /// The first sample after a reset has no time base, so only the
    /// proportional term contributes.
    pub fn update(&mut self, error: f64, now: Instant) -> f64 {
        let dt = self
            .last
            .map_or(0.0, |t| now.saturating_duration_since(t).as_secs_f64());
        self.last = Some(now);

        let mut derivative = 0.0;
        if dt > 0.0 {
            self.integral += error * dt;
            if self.gains.ki != 0.0 {
                let bound = (self.output_limit / self.gains.ki).abs();
                self.integral = self.integral.clamp(-bound, bound);
            }
            if let Some(prev) = self.prev_error {
                derivative = (error - prev) / dt;
            }
        }
        self.prev_error = Some(error);

        self.gains.kp.mul_add(
            error,
            self.gains.ki.mul_add(self.integral, self.gains.kd * derivative),
        )
    }

    /// Clear integral and derivative history.
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.prev_error = None;
        self.last = None;
    }

    #[must_use]
    pub const fn gains(&self) -> PidGains {
        self.gains
    }
}
