#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schemas and setpoint files for the plate positioning system.
//!
//! - `Config` and sub-structs are deserialized from TOML and validated.
//! - `setpoints` loads and generates the well coordinate lists.
use serde::Deserialize;

pub mod setpoints;

pub use setpoints::{GridSpec, Setpoint, generate_grid, load_setpoints_csv, write_setpoints_csv};

#[derive(Debug, Deserialize)]
pub struct Pins {
    pub step: u8,
    pub dir: u8,
    /// Home (calibration) limit switch; axis cannot be homed without it.
    pub home_switch: Option<u8>,
    /// Far-end safety limit switch.
    pub safety_switch: Option<u8>,
    pub caliper_clock: u8,
    pub caliper_data: u8,
    pub caliper_zero: u8,
    /// Treat low level as asserted for both limit switches.
    #[serde(default)]
    pub switch_active_low: bool,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MotorCfg {
    /// Step frequency used while homing (Hz).
    pub default_hz: f64,
    /// Direction output level that moves the carriage towards the home switch.
    pub home_reversed: bool,
    pub calibration_timeout_ms: u64,
    /// Delay before re-sampling a limit switch after an edge.
    pub switch_settle_ms: u64,
}

impl Default for MotorCfg {
    fn default() -> Self {
        Self {
            default_hz: 400.0,
            home_reversed: true,
            calibration_timeout_ms: 60_000,
            switch_settle_ms: 10,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PidCfg {
    pub kp: f64,
    #[serde(default)]
    pub ki: f64,
    #[serde(default)]
    pub kd: f64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ControlCfg {
    pub min_hz: f64,
    pub max_hz: f64,
    pub error_margin_mm: f64,
    pub settling_ms: u64,
    /// Distance from the home corner to the centre of the first well.
    pub setpoint_offset_mm: f64,
    /// Limit interrupts are masked this long on the first move after homing.
    pub interrupt_ignore_ms: u64,
    /// Max wait for a caliper reading before the move fails.
    pub read_timeout_ms: u64,
}

impl Default for ControlCfg {
    fn default() -> Self {
        Self {
            min_hz: 20.0,
            max_hz: 2000.0,
            error_margin_mm: 0.05,
            settling_ms: 300,
            setpoint_offset_mm: 0.0,
            interrupt_ignore_ms: 500,
            read_timeout_ms: 1000,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CaliperCfg {
    /// Clock edges closer together than this are ignored.
    pub clock_bounce_us: u64,
    /// A clock gap at least this long starts a new frame.
    pub pause_ms: u64,
    /// How long the zero output is held high.
    pub zero_pulse_ms: u64,
}

impl Default for CaliperCfg {
    fn default() -> Self {
        Self {
            clock_bounce_us: 5,
            pause_ms: 50,
            zero_pulse_ms: 100,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct FilterCfg {
    pub window: usize,
    pub max_error_mm: f64,
    /// Consecutive agreeing rejections after which the window is re-seeded (0 disables).
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

#[derive(Debug, Deserialize)]
pub struct AxisConfig {
    pub pins: Pins,
    #[serde(default)]
    pub motor: MotorCfg,
    pub pid: PidCfg,
    #[serde(default)]
    pub control: ControlCfg,
    #[serde(default)]
    pub caliper: CaliperCfg,
    #[serde(default)]
    pub filter: FilterCfg,
}

#[derive(Debug, Deserialize)]
pub struct Axes {
    pub x: AxisConfig,
    pub y: AxisConfig,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CameraBackend {
    #[default]
    Libcamera,
    Command,
    None,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CameraCfg {
    pub backend: CameraBackend,
    pub output_dir: String,
    /// Program for the `command` backend.
    pub program: Option<String>,
    /// Arguments for the `command` backend; `{path}` is replaced by the image path.
    pub args: Vec<String>,
}

impl Default for CameraCfg {
    fn default() -> Self {
        Self {
            backend: CameraBackend::Libcamera,
            output_dir: "pics".to_string(),
            program: None,
            args: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct EstopCfg {
    pub pin: Option<u8>,
    /// Treat low level as pressed when true
    pub active_low: bool,
    /// Delay before re-sampling the input after an edge.
    pub settle_ms: u64,
}

impl Default for EstopCfg {
    fn default() -> Self {
        Self {
            pin: None,
            active_low: true,
            settle_ms: 10,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RunnerCfg {
    /// Poll interval while the run is paused.
    pub pause_poll_ms: u64,
    /// Record (elapsed, position) pairs for every move.
    pub capture_samples: bool,
}

impl Default for RunnerCfg {
    fn default() -> Self {
        Self {
            pause_poll_ms: 500,
            capture_samples: false,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Config {
    pub axes: Axes,
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub camera: CameraCfg,
    #[serde(default)]
    pub estop: EstopCfg,
    #[serde(default)]
    pub runner: RunnerCfg,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

impl AxisConfig {
    fn validate(&self, axis: &str) -> eyre::Result<()> {
        let m = &self.motor;
        if !(m.default_hz.is_finite() && m.default_hz > 0.0) {
            eyre::bail!("axes.{axis}.motor.default_hz must be > 0");
        }
        if m.calibration_timeout_ms == 0 {
            eyre::bail!("axes.{axis}.motor.calibration_timeout_ms must be >= 1");
        }
        if m.switch_settle_ms > 1000 {
            eyre::bail!("axes.{axis}.motor.switch_settle_ms is unreasonably large (>1s)");
        }

        let p = &self.pid;
        if !(p.kp.is_finite() && p.ki.is_finite() && p.kd.is_finite()) {
            eyre::bail!("axes.{axis}.pid gains must be finite");
        }

        let c = &self.control;
        if !(c.min_hz.is_finite() && c.min_hz > 0.0) {
            eyre::bail!("axes.{axis}.control.min_hz must be > 0");
        }
        if !(c.max_hz.is_finite() && c.max_hz >= c.min_hz) {
            eyre::bail!("axes.{axis}.control.max_hz must be >= min_hz");
        }
        if !(c.error_margin_mm.is_finite() && c.error_margin_mm > 0.0) {
            eyre::bail!("axes.{axis}.control.error_margin_mm must be > 0");
        }
        if c.settling_ms > 60_000 {
            eyre::bail!("axes.{axis}.control.settling_ms is unreasonably large (>60s)");
        }
        if !c.setpoint_offset_mm.is_finite() {
            eyre::bail!("axes.{axis}.control.setpoint_offset_mm must be finite");
        }
        if c.read_timeout_ms == 0 {
            eyre::bail!("axes.{axis}.control.read_timeout_ms must be >= 1");
        }

        let cal = &self.caliper;
        if cal.pause_ms == 0 {
            eyre::bail!("axes.{axis}.caliper.pause_ms must be >= 1");
        }
        if cal.clock_bounce_us >= cal.pause_ms.saturating_mul(1000) {
            eyre::bail!("axes.{axis}.caliper.clock_bounce_us must be shorter than pause_ms");
        }
        if c.read_timeout_ms <= cal.pause_ms {
            eyre::bail!("axes.{axis}.control.read_timeout_ms must exceed caliper.pause_ms");
        }

        let f = &self.filter;
        if f.window == 0 {
            eyre::bail!("axes.{axis}.filter.window must be >= 1");
        }
        if !(f.max_error_mm.is_finite() && f.max_error_mm > 0.0) {
            eyre::bail!("axes.{axis}.filter.max_error_mm must be > 0");
        }
        Ok(())
    }
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        self.axes.x.validate("x")?;
        self.axes.y.validate("y")?;

        // Camera
        if self.camera.backend == CameraBackend::Command && self.camera.program.is_none() {
            eyre::bail!("camera.program is required for the command backend");
        }
        if self.camera.output_dir.trim().is_empty() {
            eyre::bail!("camera.output_dir must not be empty");
        }

        // Logging
        if let Some(r) = self.logging.rotation.as_deref()
            && !matches!(r, "never" | "daily" | "hourly")
        {
            eyre::bail!("logging.rotation must be one of never|daily|hourly");
        }

        // E-stop
        if self.estop.settle_ms > 1000 {
            eyre::bail!("estop.settle_ms is unreasonably large (>1s)");
        }

        // Runner
        if self.runner.pause_poll_ms == 0 {
            eyre::bail!("runner.pause_poll_ms must be >= 1");
        }

        Ok(())
    }
}
