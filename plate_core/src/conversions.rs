//! `From` implementations bridging `plate_config` types to `plate_core` types.

use crate::config::{CaliperCfg, ControlCfg, DecoderCfg, FilterCfg, MotorCfg, PidGains, RunnerCfg};
use std::time::Duration;

// ── PidGains ─────────────────────────────────────────────────────────────────

impl From<&plate_config::PidCfg> for PidGains {
    fn from(c: &plate_config::PidCfg) -> Self {
        Self {
            kp: c.kp,
            ki: c.ki,
            kd: c.kd,
        }
    }
}

// ── ControlCfg ───────────────────────────────────────────────────────────────

impl From<&plate_config::ControlCfg> for ControlCfg {
    fn from(c: &plate_config::ControlCfg) -> Self {
        Self {
            min_hz: c.min_hz,
            max_hz: c.max_hz,
            error_margin_mm: c.error_margin_mm,
            settling: Duration::from_millis(c.settling_ms),
            setpoint_offset_mm: c.setpoint_offset_mm,
            interrupt_ignore: Duration::from_millis(c.interrupt_ignore_ms),
            read_timeout: Duration::from_millis(c.read_timeout_ms),
        }
    }
}

// ── CaliperCfg ───────────────────────────────────────────────────────────────

impl From<&plate_config::CaliperCfg> for CaliperCfg {
    fn from(c: &plate_config::CaliperCfg) -> Self {
        Self {
            decoder: DecoderCfg {
                clock_bounce: Duration::from_micros(c.clock_bounce_us),
                pause: Duration::from_millis(c.pause_ms),
            },
            zero_pulse: Duration::from_millis(c.zero_pulse_ms),
        }
    }
}

// ── FilterCfg ────────────────────────────────────────────────────────────────

impl From<&plate_config::FilterCfg> for FilterCfg {
    fn from(c: &plate_config::FilterCfg) -> Self {
        Self {
            window: c.window,
            max_error_mm: c.max_error_mm,
            reseed_after: c.reseed_after,
        }
    }
}

// ── MotorCfg ─────────────────────────────────────────────────────────────────

impl From<&plate_config::MotorCfg> for MotorCfg {
    fn from(c: &plate_config::MotorCfg) -> Self {
        Self {
            default_hz: c.default_hz,
            home_reversed: c.home_reversed,
            calibration_timeout: Duration::from_millis(c.calibration_timeout_ms),
            switch_settle: Duration::from_millis(c.switch_settle_ms),
        }
    }
}

// ── RunnerCfg ────────────────────────────────────────────────────────────────

impl From<&plate_config::RunnerCfg> for RunnerCfg {
    fn from(c: &plate_config::RunnerCfg) -> Self {
        Self {
            pause_poll: Duration::from_millis(c.pause_poll_ms),
            capture_samples: c.capture_samples,
        }
    }
}
