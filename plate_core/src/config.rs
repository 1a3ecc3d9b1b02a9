//! Runtime configuration for the axis stack.
//!
//! These are the structs the motion core consumes. They are separate from the
//! TOML-deserialized config in `plate_config`; see `conversions`.
use std::time::Duration;

/// PID gains. The controller output is a signed step frequency in Hz.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PidGains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

/// Closed-loop move parameters.
#[derive(Debug, Clone)]
pub struct ControlCfg {
    /// Slowest commanded step frequency while outside the error band.
    pub min_hz: f64,
    /// Fastest commanded step frequency.
    pub max_hz: f64,
    /// Half-width of the band around the setpoint that counts as arrived.
    pub error_margin_mm: f64,
    /// Position must stay inside the band this long, continuously.
    pub settling: Duration,
    /// Added to every raw setpoint (home corner to first well centre).
    pub setpoint_offset_mm: f64,
    /// Home switch interrupts are masked this long on a move that asks for it.
    pub interrupt_ignore: Duration,
    /// No reading for this long is a sensor fault.
    pub read_timeout: Duration,
}

impl Default for ControlCfg {
    fn default() -> Self {
        Self {
            min_hz: 20.0,
            max_hz: 2000.0,
            error_margin_mm: 0.05,
            settling: Duration::from_millis(300),
            setpoint_offset_mm: 0.0,
            interrupt_ignore: Duration::from_millis(500),
            read_timeout: Duration::from_secs(1),
        }
    }
}

/// Caliper frame timing.
#[derive(Debug, Clone, Copy)]
pub struct DecoderCfg {
    /// Edges closer together than this are contact bounce.
    pub clock_bounce: Duration,
    /// A gap at least this long starts a new frame.
    pub pause: Duration,
}

impl Default for DecoderCfg {
    fn default() -> Self {
        Self {
            clock_bounce: Duration::from_micros(5),
            pause: Duration::from_millis(50),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CaliperCfg {
    pub decoder: DecoderCfg,
    /// How long the zero output is held high.
    pub zero_pulse: Duration,
}

impl Default for CaliperCfg {
    fn default() -> Self {
        Self {
            decoder: DecoderCfg::default(),
            zero_pulse: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FilterCfg {
    /// Number of accepted readings the median is taken over.
    pub window: usize,
    pub max_error_mm: f64,
    /// Consecutive mutually agreeing rejections that re-seed the window; 0 disables.
    pub reseed_after: u32,
}

impl Default for FilterCfg {
    fn default() -> Self {
        Self {
            window: 5,
            max_error_mm: 5.0,
            reseed_after: 5,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MotorCfg {
    /// Homing speed.
    pub default_hz: f64,
    /// Direction flag that moves the carriage towards the home switch.
    pub home_reversed: bool,
    pub calibration_timeout: Duration,
    /// Delay before a limit switch edge is confirmed by re-sampling.
    pub switch_settle: Duration,
}

impl Default for MotorCfg {
    fn default() -> Self {
        Self {
            default_hz: 400.0,
            home_reversed: true,
            calibration_timeout: Duration::from_secs(60),
            switch_settle: Duration::from_millis(10),
        }
    }
}

/// Plate run orchestration settings.
#[derive(Debug, Clone, Copy)]
pub struct RunnerCfg {
    pub pause_poll: Duration,
    pub capture_samples: bool,
}

impl Default for RunnerCfg {
    fn default() -> Self {
        Self {
            pause_poll: Duration::from_millis(500),
            capture_samples: false,
        }
    }
}
