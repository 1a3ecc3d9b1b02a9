//! Plate run orchestration: homing both axes, then visiting every well.
use crate::axis::AxisController;
use crate::calibration::CalibrationResult;
use crate::config::RunnerCfg;
use crate::error::{AxisError, Result};
use crate::estop::EmergencyStop;
use crate::status::MoveOutcome;
use crate::util::{SharedClock, lock};
use plate_config::Setpoint;
use plate_traits::{Camera, StatusSink, SwitchInput};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What a plate run achieved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlateReport {
    pub wells_completed: usize,
    pub photos: Vec<PathBuf>,
    /// The run ended early on an operator stop.
    pub stopped: bool,
}

/// Owns both axes and the camera for the lifetime of the process.
pub struct AppContext {
    x: AxisController,
    y: AxisController,
    camera: Mutex<Box<dyn Camera>>,
    status: Arc<dyn StatusSink>,
    stop: Arc<AtomicBool>,
    /// Latched by `emergency_stop`; cleared only by `rearm_emergency_stop`.
    estopped: AtomicBool,
    estop: Mutex<Option<EmergencyStop>>,
    paused: AtomicBool,
    /// Set after homing; the next move masks the home switch.
    first_move: AtomicBool,
    runner: RunnerCfg,
    clock: SharedClock,
}

impl std::fmt::Debug for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext")
            .field("x", &self.x)
            .field("y", &self.y)
            .field("stopped", &self.stop.load(Ordering::Relaxed))
            .field("estopped", &self.is_emergency_stopped())
            .field("paused", &self.is_paused())
            .finish_non_exhaustive()
    }
}

fn axis_error(e: &eyre::Report) -> Option<&AxisError> {
    e.downcast_ref::<AxisError>()
}

impl AppContext {
    /// `stop` must be the same flag the axes were built with.
    pub fn new(
        x: AxisController,
        y: AxisController,
        camera: Box<dyn Camera>,
        status: Arc<dyn StatusSink>,
        stop: Arc<AtomicBool>,
        runner: RunnerCfg,
        clock: SharedClock,
    ) -> Self {
        Self {
            x,
            y,
            camera: Mutex::new(camera),
            status,
            stop,
            estopped: AtomicBool::new(false),
            estop: Mutex::new(None),
            paused: AtomicBool::new(false),
            first_move: AtomicBool::new(false),
            runner,
            clock,
        }
    }

    #[must_use]
    pub fn x(&self) -> &AxisController {
        &self.x
    }

    #[must_use]
    pub fn y(&self) -> &AxisController {
        &self.y
    }

    /// Shared process stop flag, for signal handlers and the emergency stop.
    #[must_use]
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Home both axes concurrently and zero their calipers.
    pub fn initialise(&self) -> Result<()> {
        self.refuse_if_estopped()?;
        self.status.update_status("Calibrating axes");
        let (rx, ry) = std::thread::scope(|s| {
            let hx = s.spawn(|| self.x.calibrate());
            let hy = s.spawn(|| self.y.calibrate());
            (joined(hx.join(), &self.x), joined(hy.join(), &self.y))
        });
        let fx = rx.and_then(|r| self.finish_calibration(&self.x, r));
        let fy = ry.and_then(|r| self.finish_calibration(&self.y, r));
        self.refuse_if_estopped()?;
        fx?;
        fy?;
        self.first_move.store(true, Ordering::SeqCst);
        self.status.update_status("Calibrated");
        Ok(())
    }

    fn finish_calibration(&self, axis: &AxisController, result: CalibrationResult) -> Result<()> {
        let name = axis.name().to_string();
        match result {
            CalibrationResult::Calibrated => axis.zero_caliper(),
            CalibrationResult::TimedOut => {
                self.status
                    .update_status(&format!("Calibration of axis {name} timed out; check the home switch"));
                Err(eyre::Report::new(AxisError::CalibrationTimeout { axis: name }))
            }
            CalibrationResult::NoSwitchConfigured => {
                self.status
                    .update_status(&format!("Axis {name} has no home switch configured"));
                Err(eyre::Report::new(AxisError::NoSwitchConfigured { axis: name }))
            }
            CalibrationResult::Unsafe => {
                self.stop_process();
                self.status
                    .update_status(&format!("SAFETY: axis {name} hit its safety switch while homing"));
                Err(eyre::Report::new(AxisError::SafetyLimitTripped {
                    axis: name,
                    switch: "safety".to_string(),
                }))
            }
        }
    }

    /// Visit every setpoint in order and photograph each well.
    ///
    /// An operator stop ends the run with `report.stopped`; the emergency
    /// stop ends it with `AxisError::EmergencyStop` and leaves the stop flag set.
    pub fn run_plate(&self, setpoints: &[Setpoint]) -> Result<PlateReport> {
        self.refuse_if_estopped()?;
        self.stop.store(false, Ordering::SeqCst);
        let mut report = PlateReport::default();
        tracing::info!(wells = setpoints.len(), "plate run started");

        for (index, sp) in setpoints.iter().enumerate() {
            self.refuse_if_estopped()?;
            if self.take_stop() {
                report.stopped = true;
                break;
            }
            self.status.update_status(&format!(
                "Well {index}: moving to ({:.2}, {:.2})",
                sp.x_mm, sp.y_mm
            ));
            let ignore = self.first_move.swap(false, Ordering::SeqCst);
            if !self.move_to(*sp, ignore)? {
                self.refuse_if_estopped()?;
                self.stop.store(false, Ordering::SeqCst);
                report.stopped = true;
                break;
            }

            let name = format!("well_{index:03}");
            let path = lock(&self.camera)
                .take_photo(Some(&name))
                .map_err(|e| crate::hw_error::report("camera", &e))?;
            self.status.update_image(&path);
            tracing::info!(well = index, photo = %path.display(), "well done");
            report.photos.push(path);
            report.wells_completed += 1;

            self.wait_while_paused();
        }

        let done = format!("Plate run finished: {} wells", report.wells_completed);
        self.status.update_status(&done);
        tracing::info!(wells = report.wells_completed, stopped = report.stopped, "plate run ended");
        Ok(report)
    }

    /// Drive both axes to `sp`. `Ok(false)` when the move was stopped.
    fn move_to(&self, sp: Setpoint, ignore_interrupts: bool) -> Result<bool> {
        let capture = self.runner.capture_samples;
        self.x.start(sp.x_mm, capture, ignore_interrupts)?;
        if let Err(e) = self.y.start(sp.y_mm, capture, ignore_interrupts) {
            self.stop_axes();
            match self.x.wait_until_finished() {
                Ok(outcome) => tracing::debug!(?outcome, "x move ended after y failed to start"),
                Err(xe) => tracing::warn!(axis = "x", error = %xe, "move failed after y failed to start"),
            }
            return Err(e);
        }
        let results = [self.x.wait_until_finished(), self.y.wait_until_finished()];

        let mut settled = true;
        let mut errors = Vec::new();
        for r in results {
            match r {
                Ok(MoveOutcome::Settled(_)) => {}
                Ok(MoveOutcome::Stopped) => settled = false,
                Err(e) => errors.push(e),
            }
        }
        if let Some(pos) = errors
            .iter()
            .position(|e| matches!(axis_error(e), Some(AxisError::SafetyLimitTripped { .. })))
        {
            let fault = errors.swap_remove(pos);
            self.stop_process();
            self.status.update_status(&format!("SAFETY: {fault}"));
            tracing::error!(error = %fault, "safety fault; plate run aborted");
            return Err(fault);
        }
        if let Some(e) = errors.into_iter().next() {
            self.stop_axes();
            self.status.update_status(&format!("Move failed: {e}"));
            return Err(e);
        }
        Ok(settled)
    }

    fn stop_axes(&self) {
        for axis in [&self.x, &self.y] {
            if let Err(e) = axis.stop() {
                tracing::error!(axis = axis.name(), error = %e, "axis stop failed");
            }
        }
    }

    /// Stop both axes and make any run in progress wind down.
    pub fn stop_process(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.stop_axes();
        tracing::warn!("process stop requested");
    }

    /// Latch the emergency stop and run the stop path. Every later
    /// `initialise`/`run_plate` fails with `AxisError::EmergencyStop` until
    /// `rearm_emergency_stop` succeeds.
    pub fn emergency_stop(&self) {
        self.estopped.store(true, Ordering::SeqCst);
        self.stop_process();
        self.status.update_status("EMERGENCY STOP: release the button and re-arm");
        tracing::error!("emergency stop latched");
    }

    #[must_use]
    pub fn is_emergency_stopped(&self) -> bool {
        self.estopped.load(Ordering::SeqCst)
    }

    /// Watch `input` and call `emergency_stop` when it asserts.
    pub fn arm_emergency_stop(self: &Arc<Self>, input: Arc<dyn SwitchInput>, settle: Duration) -> Result<()> {
        let weak = Arc::downgrade(self);
        let estop = EmergencyStop::arm(input, settle, self.clock.clone(), move || {
            if let Some(ctx) = weak.upgrade() {
                ctx.emergency_stop();
            }
        })?;
        *lock(&self.estop) = Some(estop);
        Ok(())
    }

    /// Clear the latch. Fails while the button is still pressed.
    pub fn rearm_emergency_stop(&self) -> Result<()> {
        if let Some(estop) = lock(&self.estop).as_ref() {
            estop.rearm()?;
        }
        self.estopped.store(false, Ordering::SeqCst);
        self.stop.store(false, Ordering::SeqCst);
        self.status.update_status("Emergency stop re-armed");
        Ok(())
    }

    fn refuse_if_estopped(&self) -> Result<()> {
        if self.is_emergency_stopped() {
            return Err(eyre::Report::new(AxisError::EmergencyStop));
        }
        Ok(())
    }

    fn take_stop(&self) -> bool {
        self.stop.swap(false, Ordering::SeqCst)
    }

    /// Flip the pause flag; returns the new state.
    pub fn toggle_pause(&self) -> bool {
        let paused = !self.paused.fetch_xor(true, Ordering::SeqCst);
        self.status
            .update_status(if paused { "Paused" } else { "Resumed" });
        paused
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    fn wait_while_paused(&self) {
        while self.is_paused() && !self.stop.load(Ordering::SeqCst) {
            self.clock.sleep(self.runner.pause_poll);
        }
    }
}

fn joined(
    r: std::thread::Result<Result<CalibrationResult>>,
    axis: &AxisController,
) -> Result<CalibrationResult> {
    r.map_err(|_| {
        eyre::Report::new(AxisError::State(format!(
            "axis {}: calibration thread panicked",
            axis.name()
        )))
    })?
}
