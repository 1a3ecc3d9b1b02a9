//! Type-state builder for `AxisController` and the config-driven `build_axis`.
//!
//! `build()` only exists once a motor and a caliper are set; `try_build()` is
//! always available and reports what is missing at runtime.

use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use plate_traits::{ClockLine, DigitalOutput, StepGenerator, SwitchInput};

use crate::axis::{AxisController, AxisInner};
use crate::caliper::Caliper;
use crate::config::{CaliperCfg, ControlCfg, FilterCfg, MotorCfg, PidGains};
use crate::error::{BuildError, Result};
use crate::motor::MotorDriver;
use crate::util::{SharedClock, monotonic};

// ── Type-state markers ───────────────────────────────────────────────────────

pub struct Missing;
pub struct Set;

/// Builder for `AxisController`. Validation happens on `build()`.
pub struct AxisBuilder<M, C> {
    name: String,
    motor: Option<MotorDriver>,
    caliper: Option<Caliper>,
    pid: Option<PidGains>,
    control: Option<ControlCfg>,
    clock: Option<SharedClock>,
    process_stop: Option<Arc<AtomicBool>>,
    _m: PhantomData<M>,
    _c: PhantomData<C>,
}

impl AxisController {
    /// Start building an axis called `name`.
    pub fn builder(name: impl Into<String>) -> AxisBuilder<Missing, Missing> {
        AxisBuilder {
            name: name.into(),
            motor: None,
            caliper: None,
            pid: None,
            control: None,
            clock: None,
            process_stop: None,
            _m: PhantomData,
            _c: PhantomData,
        }
    }
}

fn validate(control: &ControlCfg, pid: &PidGains) -> Result<()> {
    let invalid = |msg| Err(eyre::Report::new(BuildError::InvalidConfig(msg)));
    if !control.min_hz.is_finite() || control.min_hz <= 0.0 {
        return invalid("min_hz must be > 0");
    }
    if !control.max_hz.is_finite() || control.max_hz < control.min_hz {
        return invalid("max_hz must be >= min_hz");
    }
    if !control.error_margin_mm.is_finite() || control.error_margin_mm <= 0.0 {
        return invalid("error_margin_mm must be > 0");
    }
    if !control.setpoint_offset_mm.is_finite() {
        return invalid("setpoint_offset_mm must be finite");
    }
    if control.read_timeout.is_zero() {
        return invalid("read_timeout must be > 0");
    }
    if !(pid.kp.is_finite() && pid.ki.is_finite() && pid.kd.is_finite()) {
        return invalid("PID gains must be finite");
    }
    Ok(())
}

impl<M, C> AxisBuilder<M, C> {
    /// Fallible build available in any type-state.
    pub fn try_build(self) -> Result<AxisController> {
        let motor = self
            .motor
            .ok_or_else(|| eyre::Report::new(BuildError::MissingMotor))?;
        let caliper = self
            .caliper
            .ok_or_else(|| eyre::Report::new(BuildError::MissingCaliper))?;
        let pid = self
            .pid
            .ok_or_else(|| eyre::Report::new(BuildError::MissingPid))?;
        let control = self.control.unwrap_or_default();
        validate(&control, &pid)?;

        Ok(AxisController::from_inner(AxisInner {
            name: self.name,
            motor,
            caliper,
            control,
            pid,
            clock: self.clock.unwrap_or_else(monotonic),
            stop: AtomicBool::new(false),
            process_stop: self
                .process_stop
                .unwrap_or_else(|| Arc::new(AtomicBool::new(false))),
            setpoint: std::sync::Mutex::new(None),
            samples: std::sync::Mutex::new(Vec::new()),
            last_position: std::sync::Mutex::new(None),
        }))
    }

    pub fn with_pid(mut self, pid: PidGains) -> Self {
        self.pid = Some(pid);
        self
    }

    pub fn with_control(mut self, control: ControlCfg) -> Self {
        self.control = Some(control);
        self
    }

    /// Clock for the control loop; defaults to `MonotonicClock`.
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Process-wide stop flag. Observed by the loop and set on a safety fault.
    pub fn with_process_stop(mut self, stop: Arc<AtomicBool>) -> Self {
        self.process_stop = Some(stop);
        self
    }
}

// Setters that advance type-state
impl<C> AxisBuilder<Missing, C> {
    pub fn with_motor(self, motor: MotorDriver) -> AxisBuilder<Set, C> {
        AxisBuilder {
            name: self.name,
            motor: Some(motor),
            caliper: self.caliper,
            pid: self.pid,
            control: self.control,
            clock: self.clock,
            process_stop: self.process_stop,
            _m: PhantomData,
            _c: PhantomData,
        }
    }
}

impl<M> AxisBuilder<M, Missing> {
    pub fn with_caliper(self, caliper: Caliper) -> AxisBuilder<M, Set> {
        AxisBuilder {
            name: self.name,
            motor: self.motor,
            caliper: Some(caliper),
            pid: self.pid,
            control: self.control,
            clock: self.clock,
            process_stop: self.process_stop,
            _m: PhantomData,
            _c: PhantomData,
        }
    }
}

impl AxisBuilder<Set, Set> {
    /// Validate and build. Only available once motor and caliper are set.
    pub fn build(self) -> Result<AxisController> {
        self.try_build()
    }
}

/// The hardware handles one axis is assembled from.
pub struct AxisHardware {
    pub stepper: Box<dyn StepGenerator>,
    pub home: Option<Arc<dyn SwitchInput>>,
    pub safety: Option<Arc<dyn SwitchInput>>,
    pub clock_line: Box<dyn ClockLine>,
    pub zero_out: Box<dyn DigitalOutput>,
}

/// Build an axis from its TOML section and a set of hardware handles.
pub fn build_axis(
    name: &str,
    cfg: &plate_config::AxisConfig,
    hw: AxisHardware,
    clock: SharedClock,
    process_stop: Arc<AtomicBool>,
) -> Result<AxisController> {
    let motor = MotorDriver::new(
        name,
        hw.stepper,
        hw.home,
        hw.safety,
        MotorCfg::from(&cfg.motor),
        clock.clone(),
    )?;
    let caliper = Caliper::new(
        name,
        hw.clock_line,
        hw.zero_out,
        &CaliperCfg::from(&cfg.caliper),
        &FilterCfg::from(&cfg.filter),
        clock.clone(),
    );
    AxisController::builder(name)
        .with_motor(motor)
        .with_caliper(caliper)
        .with_pid(PidGains::from(&cfg.pid))
        .with_control(ControlCfg::from(&cfg.control))
        .with_clock(clock)
        .with_process_stop(process_stop)
        .build()
}
