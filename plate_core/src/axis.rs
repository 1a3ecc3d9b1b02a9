//! Closed-loop position control of one axis.
//!
//! `AxisController` owns the motor and caliper of an axis and runs each move
//! on a dedicated control thread. The per-reading logic lives in
//! `ControlLoop::step`, which is deterministic given a clock and can be driven
//! directly by tests.
use crate::caliper::{Caliper, Reading};
use crate::calibration::CalibrationResult;
use crate::config::{ControlCfg, PidGains};
use crate::error::{AxisError, Result};
use crate::motor::MotorDriver;
use crate::pid::Pid;
use crate::settle::{SettleTracker, Settling};
use crate::status::{AxisStatus, MoveOutcome, MoveReport};
use crate::util::{POLL_SLICE, SharedClock, lock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Per-reading control logic for one move.
pub struct ControlLoop<'a> {
    axis: &'a str,
    motor: &'a MotorDriver,
    pid: Pid,
    settle: SettleTracker,
    setpoint: f64,
    min_hz: f64,
    max_hz: f64,
    iteration: u64,
    started: bool,
    position: Option<f64>,
    readings: u32,
    rejected: u32,
    last_hz: f64,
}

impl<'a> ControlLoop<'a> {
    #[must_use]
    pub fn new(
        axis: &'a str,
        motor: &'a MotorDriver,
        control: &ControlCfg,
        gains: PidGains,
        setpoint: f64,
    ) -> Self {
        Self {
            axis,
            motor,
            pid: Pid::new(gains, control.max_hz),
            settle: SettleTracker::new(control.error_margin_mm, control.settling),
            setpoint,
            min_hz: control.min_hz,
            max_hz: control.max_hz,
            iteration: 0,
            started: false,
            position: None,
            readings: 0,
            rejected: 0,
            last_hz: 0.0,
        }
    }

    /// Process one reading taken at `now`.
    pub fn step(&mut self, reading: Reading, now: Instant) -> Result<AxisStatus> {
        let first = self.iteration == 0;
        self.iteration += 1;
        self.readings = self.readings.saturating_add(1);

        // A switch may still be latched from the previous stop when the move
        // begins; only a hit after the first iteration is a fault.
        if first {
            if let Some(switch) = self.motor.hit() {
                tracing::debug!(axis = self.axis, %switch, "clearing stale limit hit");
                self.motor.clear_hit();
            }
        } else if let Some(switch) = self.motor.hit() {
            self.motor.stop()?;
            return Ok(AxisStatus::Aborted(AxisError::SafetyLimitTripped {
                axis: self.axis.to_string(),
                switch: switch.to_string(),
            }));
        }

        let Some(position) = reading.accepted() else {
            self.rejected = self.rejected.saturating_add(1);
            tracing::trace!(axis = self.axis, ?reading, "reading rejected; holding motor");
            self.motor.set_frequency(0.0)?;
            return Ok(AxisStatus::Running);
        };
        self.position = Some(position);

        let error = self.setpoint - position;
        match self.settle.observe(error, now) {
            Settling::Settled => {
                self.motor.stop()?;
                tracing::info!(axis = self.axis, position, setpoint = self.setpoint, "settled");
                return Ok(AxisStatus::Settled);
            }
            Settling::Entered | Settling::Holding => {
                self.motor.set_frequency(0.0)?;
                return Ok(AxisStatus::Running);
            }
            Settling::Outside => {}
        }

        let output = self.pid.update(error, now);
        let reversed = output < 0.0;
        if reversed != self.motor.is_reversed() {
            self.motor.reverse(Some(reversed))?;
        }
        let hz = output.abs().clamp(self.min_hz, self.max_hz);
        self.motor.set_frequency(hz)?;
        if !self.started {
            self.motor.start(None)?;
            self.started = true;
        }
        self.last_hz = hz;
        tracing::trace!(axis = self.axis, position, error, hz, reversed, "control step");
        Ok(AxisStatus::Running)
    }

    /// Last accepted position.
    #[must_use]
    pub const fn position(&self) -> Option<f64> {
        self.position
    }

    /// Frequency commanded by the last out-of-band step.
    #[must_use]
    pub const fn last_frequency(&self) -> f64 {
        self.last_hz
    }

    fn report(&self, elapsed_s: f64) -> MoveReport {
        MoveReport {
            setpoint_mm: self.setpoint,
            final_position_mm: self.position.unwrap_or(f64::NAN),
            elapsed_s,
            readings: self.readings,
            rejected: self.rejected,
        }
    }
}

pub(crate) struct AxisInner {
    pub(crate) name: String,
    pub(crate) motor: MotorDriver,
    pub(crate) caliper: Caliper,
    pub(crate) control: ControlCfg,
    pub(crate) pid: PidGains,
    pub(crate) clock: SharedClock,
    pub(crate) stop: AtomicBool,
    pub(crate) process_stop: Arc<AtomicBool>,
    pub(crate) setpoint: Mutex<Option<f64>>,
    pub(crate) samples: Mutex<Vec<(f64, f64)>>,
    pub(crate) last_position: Mutex<Option<f64>>,
}

impl AxisInner {
    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst) || self.process_stop.load(Ordering::SeqCst)
    }

    fn run_move(&self, setpoint: f64, capture: bool, mut unmask_at: Option<Instant>) -> Result<MoveOutcome> {
        let started = self.clock.now();
        let mut ctl = ControlLoop::new(&self.name, &self.motor, &self.control, self.pid, setpoint);
        let slice = POLL_SLICE.min(self.control.read_timeout);
        let mut waited = Duration::ZERO;
        // rejected readings hold the motor; a streak as long as the read timeout is a dead sensor
        let mut last_accepted = started;

        loop {
            if self.stop_requested() {
                return Ok(MoveOutcome::Stopped);
            }
            if let Some(at) = unmask_at
                && self.clock.now() >= at
            {
                self.motor.enable_interrupts();
                unmask_at = None;
            }

            let Some(reading) = self.caliper.get_reading(slice) else {
                waited += slice;
                if waited >= self.control.read_timeout {
                    if self.stop_requested() {
                        return Ok(MoveOutcome::Stopped);
                    }
                    tracing::error!(axis = %self.name, ?waited, "no caliper reading");
                    return Err(eyre::Report::new(AxisError::SensorTimeout {
                        axis: self.name.clone(),
                    }));
                }
                continue;
            };
            waited = Duration::ZERO;

            let now = self.clock.now();
            if let Some(mm) = reading.accepted() {
                last_accepted = now;
                *lock(&self.last_position) = Some(mm);
                if capture {
                    lock(&self.samples).push((self.clock.secs_since(started), mm));
                }
            } else if now.saturating_duration_since(last_accepted) >= self.control.read_timeout {
                self.motor.stop()?;
                if self.stop_requested() {
                    return Ok(MoveOutcome::Stopped);
                }
                tracing::error!(axis = %self.name, ?reading, "caliper readings rejected for the whole read timeout");
                return Err(eyre::Report::new(AxisError::SensorTimeout {
                    axis: self.name.clone(),
                }));
            }
            match ctl.step(reading, now)? {
                AxisStatus::Running => {}
                AxisStatus::Settled => {
                    return Ok(MoveOutcome::Settled(ctl.report(self.clock.secs_since(started))));
                }
                AxisStatus::Aborted(e) => {
                    if matches!(e, AxisError::SafetyLimitTripped { .. }) {
                        tracing::error!(axis = %self.name, error = %e, "safety fault; stopping process");
                        self.process_stop.store(true, Ordering::SeqCst);
                    }
                    return Err(eyre::Report::new(e));
                }
            }
        }
    }

    /// Leave the axis idle after a move, whatever its outcome.
    fn finish_move(&self) {
        if let Err(e) = self.motor.stop() {
            tracing::error!(axis = %self.name, error = %e, "motor stop after move failed");
        }
        if let Err(e) = self.caliper.stop_listening() {
            tracing::warn!(axis = %self.name, error = %e, "caliper stop after move failed");
        }
        self.motor.enable_interrupts();
        *lock(&self.setpoint) = None;
    }
}

/// One axis: motor, caliper and the PID loop between them.
pub struct AxisController {
    pub(crate) inner: Arc<AxisInner>,
    worker: Mutex<Option<JoinHandle<Result<MoveOutcome>>>>,
}

impl std::fmt::Debug for AxisController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AxisController")
            .field("name", &self.inner.name)
            .field("setpoint", &self.setpoint())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl AxisController {
    pub(crate) fn from_inner(inner: AxisInner) -> Self {
        Self {
            inner: Arc::new(inner),
            worker: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Begin a move to `raw_setpoint + setpoint_offset`.
    ///
    /// `ignore_interrupts` masks the home switch for `interrupt_ignore`, for
    /// the first move after homing when leaving the switch can retrigger it.
    pub fn start(&self, raw_setpoint: f64, capture_samples: bool, ignore_interrupts: bool) -> Result<()> {
        if !raw_setpoint.is_finite() {
            return Err(eyre::Report::new(AxisError::Config(format!(
                "axis {}: setpoint must be finite",
                self.inner.name
            ))));
        }
        let mut worker = lock(&self.worker);
        if let Some(h) = worker.as_ref()
            && !h.is_finished()
        {
            return Err(eyre::Report::new(AxisError::State(format!(
                "axis {}: move already in progress",
                self.inner.name
            ))));
        }
        if let Some(h) = worker.take() {
            match h.join() {
                Ok(Err(e)) => tracing::warn!(axis = %self.inner.name, error = %e, "uncollected move failed"),
                Err(_) => tracing::warn!(axis = %self.inner.name, "uncollected move panicked"),
                Ok(Ok(_)) => {}
            }
        }

        let inner = &self.inner;
        let setpoint = raw_setpoint + inner.control.setpoint_offset_mm;
        inner.stop.store(false, Ordering::SeqCst);
        inner.caliper.reset_filter();
        if capture_samples {
            lock(&inner.samples).clear();
        }
        *lock(&inner.setpoint) = Some(setpoint);
        let unmask_at = if ignore_interrupts {
            inner.motor.disable_interrupts();
            Some(inner.clock.now() + inner.control.interrupt_ignore)
        } else {
            None
        };
        if let Err(e) = inner.caliper.start_listening() {
            inner.finish_move();
            return Err(e);
        }
        tracing::info!(axis = %inner.name, raw_setpoint, setpoint, ignore_interrupts, "move started");

        let thread_inner = Arc::clone(inner);
        let handle = std::thread::Builder::new()
            .name(format!("{}-control", inner.name))
            .spawn(move || {
                let result = thread_inner.run_move(setpoint, capture_samples, unmask_at);
                thread_inner.finish_move();
                result
            });
        match handle {
            Ok(h) => {
                *worker = Some(h);
                Ok(())
            }
            Err(e) => {
                inner.finish_move();
                Err(eyre::eyre!("spawn control loop for axis {}: {e}", inner.name))
            }
        }
    }

    /// Ask the loop to end and stop the motor. Idempotent.
    pub fn stop(&self) -> Result<()> {
        self.inner.stop.store(true, Ordering::SeqCst);
        let motor = self.inner.motor.stop();
        let caliper = self.inner.caliper.stop_listening();
        motor.and(caliper)
    }

    /// Block until the current move ends. Returns `Stopped` when idle.
    pub fn wait_until_finished(&self) -> Result<MoveOutcome> {
        let handle = lock(&self.worker).take();
        match handle {
            None => Ok(MoveOutcome::Stopped),
            Some(h) => h.join().map_err(|_| {
                eyre::Report::new(AxisError::State(format!(
                    "axis {}: control loop panicked",
                    self.inner.name
                )))
            })?,
        }
    }

    /// Home the axis. Cancelled by `stop()` or the process stop flag.
    pub fn calibrate(&self) -> Result<CalibrationResult> {
        self.inner.stop.store(false, Ordering::SeqCst);
        let inner = &self.inner;
        inner.motor.calibrate(|| inner.stop_requested())
    }

    /// Declare the current caliper position the origin.
    pub fn zero_caliper(&self) -> Result<()> {
        self.inner.caliper.zero()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        lock(&self.worker).as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Target of the move in progress, offset included.
    #[must_use]
    pub fn setpoint(&self) -> Option<f64> {
        *lock(&self.inner.setpoint)
    }

    #[must_use]
    pub fn last_position(&self) -> Option<f64> {
        *lock(&self.inner.last_position)
    }

    /// `(elapsed_s, position_mm)` pairs captured by the last move that asked for it.
    #[must_use]
    pub fn samples(&self) -> Vec<(f64, f64)> {
        lock(&self.inner.samples).clone()
    }

    #[must_use]
    pub fn motor(&self) -> &MotorDriver {
        &self.inner.motor
    }

    #[must_use]
    pub fn caliper(&self) -> &Caliper {
        &self.inner.caliper
    }

    #[must_use]
    pub fn control(&self) -> &ControlCfg {
        &self.inner.control
    }
}

impl Drop for AxisController {
    fn drop(&mut self) {
        self.inner.stop.store(true, Ordering::SeqCst);
        if let Some(h) = lock(&self.worker).take()
            && h.join().is_err()
        {
            tracing::warn!(axis = %self.inner.name, "control loop panicked during shutdown");
        }
    }
}
