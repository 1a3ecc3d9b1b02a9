//! Homing: drive an axis onto its home switch to define the zero reference.
use crate::motor::{LimitSwitch, MotorDriver};
use std::time::Duration;

/// How often the homing wait re-checks the hit flag.
const HOMING_POLL: Duration = Duration::from_millis(5);

/// Outcome of one calibration attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationResult {
    /// On the home switch; step counter reset.
    Calibrated,
    /// The home switch never tripped within the timeout.
    TimedOut,
    /// The axis has no home switch to calibrate against.
    NoSwitchConfigured,
    /// The far-end safety switch tripped while homing.
    Unsafe,
}

/// Phases of the homing state machine, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationState {
    Idle,
    Homing,
    Done(CalibrationResult),
}

impl MotorDriver {
    /// Run the homing sequence. Never returns with the motor stepping.
    ///
    /// `cancelled` is polled while homing; when it returns true the motor is
    /// stopped and `AxisError::Stopped` is returned.
    pub fn calibrate(&self, cancelled: impl Fn() -> bool) -> crate::Result<CalibrationResult> {
        self.set_calibration_state(CalibrationState::Homing);
        let result = self.home(&cancelled);
        self.set_calibration_state(match &result {
            Ok(r) => CalibrationState::Done(*r),
            Err(_) => CalibrationState::Idle,
        });
        if result.is_err() || self.is_stepping() {
            // leave nothing running whatever happened above
            if let Err(e) = self.stop() {
                tracing::error!(axis = %self.name(), error = %e, "stop after calibration failed");
            }
        }
        result
    }

    fn home(&self, cancelled: &dyn Fn() -> bool) -> crate::Result<CalibrationResult> {
        if !self.has_home_switch() {
            tracing::warn!(axis = %self.name(), "no home switch configured; skipping calibration");
            return Ok(CalibrationResult::NoSwitchConfigured);
        }

        if self.home_asserted() == Some(true) || self.safety_asserted() == Some(true) {
            self.stop()?;
            self.reset_step_count();
            tracing::info!(axis = %self.name(), "already on a limit switch; calibrated in place");
            return Ok(CalibrationResult::Calibrated);
        }

        let cfg = *self.config();
        let clock = self.clock().clone();
        self.enable_interrupts();
        self.reverse(Some(cfg.home_reversed))?;
        self.set_frequency(cfg.default_hz)?;
        self.start(None)?;
        tracing::info!(
            axis = %self.name(),
            hz = cfg.default_hz,
            timeout = ?cfg.calibration_timeout,
            "homing"
        );

        let started = clock.now();
        loop {
            match self.hit() {
                Some(LimitSwitch::Home) => {
                    self.stop()?;
                    self.reset_step_count();
                    tracing::info!(axis = %self.name(), "home switch reached; calibrated");
                    return Ok(CalibrationResult::Calibrated);
                }
                Some(LimitSwitch::Safety) => {
                    self.stop()?;
                    tracing::error!(axis = %self.name(), "safety switch tripped while homing");
                    return Ok(CalibrationResult::Unsafe);
                }
                None => {}
            }
            if cancelled() {
                self.stop()?;
                return Err(eyre::Report::new(crate::AxisError::Stopped));
            }
            if clock.now().saturating_duration_since(started) >= cfg.calibration_timeout {
                self.stop()?;
                tracing::error!(axis = %self.name(), "calibration timed out");
                return Ok(CalibrationResult::TimedOut);
            }
            clock.sleep(HOMING_POLL);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MotorCfg;
    use plate_hardware::sim::{SimCommand, SimStepGenerator, SimSwitch};
    use plate_traits::{Clock, SwitchInput};
    use plate_traits::test_clock::TestClock;
    use std::sync::Arc;

    fn driver(
        home: Option<SimSwitch>,
        safety: Option<SimSwitch>,
        clock: &TestClock,
    ) -> (MotorDriver, SimStepGenerator) {
        let g = SimStepGenerator::new();
        let cfg = MotorCfg {
            calibration_timeout: Duration::from_secs(5),
            switch_settle: Duration::ZERO,
            ..MotorCfg::default()
        };
        let m = MotorDriver::new(
            "y",
            Box::new(g.clone()),
            home.map(|s| Arc::new(s) as Arc<dyn SwitchInput>),
            safety.map(|s| Arc::new(s) as Arc<dyn SwitchInput>),
            cfg,
            Arc::new(clock.clone()),
        )
        .unwrap();
        (m, g)
    }

    #[test]
    fn already_home_calibrates_without_moving() {
        let clock = TestClock::new();
        let home = SimSwitch::new();
        home.set_asserted(true);
        let (m, g) = driver(Some(home), None, &clock);
        let t0 = clock.now();
        assert_eq!(m.calibrate(|| false).unwrap(), CalibrationResult::Calibrated);
        assert!(!g.commands().iter().any(|c| matches!(c, SimCommand::Start(_))));
        assert_eq!(clock.now(), t0);
        assert_eq!(m.step_count(), 0);
    }

    #[test]
    fn timeout_stops_motor() {
        let clock = TestClock::new();
        let (m, g) = driver(Some(SimSwitch::new()), None, &clock);
        assert_eq!(m.calibration_state(), CalibrationState::Idle);
        assert_eq!(m.calibrate(|| false).unwrap(), CalibrationResult::TimedOut);
        assert_eq!(
            m.calibration_state(),
            CalibrationState::Done(CalibrationResult::TimedOut)
        );
        assert!(!g.is_running());
        assert!(!m.is_stepping());
        assert!(clock.ms_since(clock.at_secs(0.0)) >= 5000);
        // homing ran towards the home side
        assert!(g.commands().contains(&SimCommand::Direction(true)));
    }

    #[test]
    fn no_home_switch_reports_without_moving() {
        let clock = TestClock::new();
        let (m, g) = driver(None, Some(SimSwitch::new()), &clock);
        assert_eq!(
            m.calibrate(|| false).unwrap(),
            CalibrationResult::NoSwitchConfigured
        );
        assert!(g.commands().is_empty());
    }

    #[test]
    fn cancellation_stops_homing() {
        let clock = TestClock::new();
        let (m, g) = driver(Some(SimSwitch::new()), None, &clock);
        let err = m.calibrate(|| true).unwrap_err();
        assert_eq!(
            err.downcast_ref::<crate::AxisError>(),
            Some(&crate::AxisError::Stopped)
        );
        assert!(!g.is_running());
    }
}
