//! Stepper motor driver with limit-switch safety cutoff.
//!
//! Pulses come from a `StepGenerator` (hardware PWM on the Pi), so the driver
//! only tracks commanded state. The step counter is derived from elapsed time
//! and frequency per pulse segment; it is telemetry only.
//!
//! Limit switches are confirmed on a watcher thread (see `watch`). A confirmed
//! edge latches the hit flag and stops pulses immediately, independent of
//! whatever the control loop is doing. Masking interrupts only affects the
//! home switch; the far-end safety switch always stops the motor.
use crate::calibration::CalibrationState;
use crate::config::MotorCfg;
use crate::hw_error::report;
use crate::util::{SharedClock, lock};
use crate::watch::SwitchWatcher;
use plate_traits::{StepGenerator, SwitchInput};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Which limit switch stopped the motor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitSwitch {
    Home,
    Safety,
}

impl LimitSwitch {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Home => "home",
            Self::Safety => "safety",
        }
    }
}

impl std::fmt::Display for LimitSwitch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

const HIT_NONE: u8 = 0;
const HIT_HOME: u8 = 1;
const HIT_SAFETY: u8 = 2;

/// Snapshot of the commanded motor state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotorState {
    /// Direction flag; `false` moves towards increasing caliper readings.
    pub reversed: bool,
    /// Commanded step frequency, 0 while held.
    pub frequency_hz: f64,
    /// Pulse high-time in percent of the period.
    pub duty_cycle_pct: f64,
    /// True iff pulses are being generated.
    pub stepping: bool,
    /// Motion paused by a zero speed command; a non-zero command resumes it.
    pub held: bool,
}

struct Drive {
    generator: Box<dyn StepGenerator>,
    state: MotorState,
    banked_steps: f64,
    segment_start: Option<Instant>,
}

impl Drive {
    /// Fold the running pulse segment into the step counter.
    fn bank(&mut self, now: Instant) {
        if let Some(start) = self.segment_start.take() {
            let steps = now.saturating_duration_since(start).as_secs_f64() * self.state.frequency_hz;
            self.banked_steps += if self.state.reversed { -steps } else { steps };
        }
        if self.state.stepping {
            self.segment_start = Some(now);
        }
    }

    fn halt(&mut self, now: Instant) -> Result<(), plate_traits::BoxError> {
        self.bank(now);
        self.state.stepping = false;
        self.segment_start = None;
        self.generator.stop()
    }

    fn run(&mut self, now: Instant) -> Result<(), plate_traits::BoxError> {
        self.bank(now);
        self.generator.start(self.state.frequency_hz)?;
        self.state.stepping = true;
        self.state.held = false;
        self.segment_start = Some(now);
        Ok(())
    }
}

struct Shared {
    name: String,
    drive: Mutex<Drive>,
    hit: AtomicU8,
    interrupts_enabled: AtomicBool,
    run_id: AtomicU64,
    clock: SharedClock,
}

impl Shared {
    fn on_limit(&self, switch: LimitSwitch) {
        if switch == LimitSwitch::Home && !self.interrupts_enabled.load(Ordering::SeqCst) {
            tracing::debug!(axis = %self.name, "home switch edge while masked; ignored");
            return;
        }
        let code = match switch {
            LimitSwitch::Home => HIT_HOME,
            LimitSwitch::Safety => HIT_SAFETY,
        };
        // a safety hit is never downgraded to a home hit
        let _ = self
            .hit
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |cur| (cur != HIT_SAFETY).then_some(code));
        self.run_id.fetch_add(1, Ordering::SeqCst);
        let mut drive = lock(&self.drive);
        drive.state.held = false;
        if let Err(e) = drive.halt(self.clock.now()) {
            tracing::error!(axis = %self.name, error = %e, "failed to stop motor on limit switch");
        }
        tracing::warn!(axis = %self.name, %switch, "limit switch hit; motor stopped");
    }
}

/// Drives one stepper. Owned by exactly one axis.
pub struct MotorDriver {
    shared: Arc<Shared>,
    home: Option<Arc<dyn SwitchInput>>,
    safety: Option<Arc<dyn SwitchInput>>,
    cfg: MotorCfg,
    calibration: Mutex<CalibrationState>,
    _watcher: Option<SwitchWatcher>,
}

impl std::fmt::Debug for MotorDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MotorDriver")
            .field("name", &self.shared.name)
            .field("state", &self.state())
            .field("hit", &self.hit())
            .finish_non_exhaustive()
    }
}

impl MotorDriver {
    /// Take ownership of the pulse output and subscribe to the limit switches.
    pub fn new(
        name: impl Into<String>,
        generator: Box<dyn StepGenerator>,
        home: Option<Arc<dyn SwitchInput>>,
        safety: Option<Arc<dyn SwitchInput>>,
        cfg: MotorCfg,
        clock: SharedClock,
    ) -> crate::Result<Self> {
        let name = name.into();
        let shared = Arc::new(Shared {
            name: name.clone(),
            drive: Mutex::new(Drive {
                generator,
                state: MotorState {
                    reversed: false,
                    frequency_hz: cfg.default_hz,
                    duty_cycle_pct: 50.0,
                    stepping: false,
                    held: false,
                },
                banked_steps: 0.0,
                segment_start: None,
            }),
            hit: AtomicU8::new(HIT_NONE),
            interrupts_enabled: AtomicBool::new(true),
            run_id: AtomicU64::new(0),
            clock: clock.clone(),
        });

        let mut inputs = Vec::new();
        if let Some(h) = &home {
            inputs.push((LimitSwitch::Home, h.clone()));
        }
        if let Some(s) = &safety {
            inputs.push((LimitSwitch::Safety, s.clone()));
        }
        let watcher = if inputs.is_empty() {
            None
        } else {
            let weak = Arc::downgrade(&shared);
            Some(SwitchWatcher::spawn(
                &name,
                inputs,
                cfg.switch_settle,
                clock,
                move |switch| {
                    if let Some(shared) = weak.upgrade() {
                        shared.on_limit(switch);
                    }
                },
            )?)
        };

        Ok(Self {
            shared,
            home,
            safety,
            cfg,
            calibration: Mutex::new(CalibrationState::Idle),
            _watcher: watcher,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    #[must_use]
    pub const fn config(&self) -> &MotorCfg {
        &self.cfg
    }

    fn now(&self) -> Instant {
        self.shared.clock.now()
    }

    fn hw(&self, e: &plate_traits::BoxError) -> eyre::Report {
        report(&self.shared.name, e)
    }

    /// Begin stepping at the current frequency. Clears the hit flag.
    ///
    /// With `count`, pulses stop after roughly `count` steps. Hardware pulses
    /// are not counted individually, so the stop is timed as `count / hz`.
    pub fn start(&self, count: Option<u32>) -> crate::Result<()> {
        self.shared.hit.store(HIT_NONE, Ordering::SeqCst);
        let run = self.shared.run_id.fetch_add(1, Ordering::SeqCst) + 1;
        let hz = {
            let mut drive = lock(&self.shared.drive);
            if !drive.state.frequency_hz.is_finite() || drive.state.frequency_hz <= 0.0 {
                return Err(eyre::Report::new(crate::AxisError::State(format!(
                    "motor {}: cannot start at {} Hz",
                    self.shared.name, drive.state.frequency_hz
                ))));
            }
            let now = self.now();
            drive.run(now).map_err(|e| self.hw(&e))?;
            drive.state.frequency_hz
        };
        tracing::debug!(axis = %self.shared.name, hz, ?count, "motor start");

        if let Some(n) = count {
            let shared = Arc::clone(&self.shared);
            let after = crate::util::secs(f64::from(n) / hz);
            std::thread::Builder::new()
                .name(format!("{}-count", self.shared.name))
                .spawn(move || {
                    shared.clock.sleep(after);
                    if shared.run_id.load(Ordering::SeqCst) != run {
                        return;
                    }
                    let mut drive = lock(&shared.drive);
                    if drive.state.stepping
                        && let Err(e) = drive.halt(shared.clock.now())
                    {
                        tracing::error!(axis = %shared.name, error = %e, "counted stop failed");
                    }
                })
                .map_err(|e| eyre::eyre!("spawn step counter timer: {e}"))?;
        }
        Ok(())
    }

    /// Halt pulses immediately. Clears the hit flag and any hold.
    pub fn stop(&self) -> crate::Result<()> {
        self.shared.run_id.fetch_add(1, Ordering::SeqCst);
        let result = {
            let mut drive = lock(&self.shared.drive);
            drive.state.held = false;
            drive.halt(self.now())
        };
        self.shared.hit.store(HIT_NONE, Ordering::SeqCst);
        result.map_err(|e| self.hw(&e))
    }

    /// Change the step frequency of the running motion.
    ///
    /// Zero (or negative) holds the motor: pulses pause but the motion stays
    /// armed, and the next positive frequency resumes it. A motor stopped by a
    /// limit switch is never resumed here.
    pub fn set_frequency(&self, hz: f64) -> crate::Result<()> {
        let now = self.now();
        let mut drive = lock(&self.shared.drive);
        if !hz.is_finite() || hz <= 0.0 {
            if drive.state.stepping {
                drive.halt(now).map_err(|e| self.hw(&e))?;
                drive.state.held = true;
            }
            drive.state.frequency_hz = 0.0;
            return Ok(());
        }

        drive.bank(now);
        drive.state.frequency_hz = hz;
        if drive.state.stepping {
            drive.generator.set_frequency(hz).map_err(|e| self.hw(&e))?;
        } else if drive.state.held && !self.is_tripped() {
            drive.run(now).map_err(|e| self.hw(&e))?;
        }
        Ok(())
    }

    /// Speed command as PWM duty percentage; 0 holds the motor like a zero frequency.
    pub fn set_duty_cycle(&self, pct: f64) -> crate::Result<()> {
        let pct = if pct.is_finite() { pct.clamp(0.0, 100.0) } else { 0.0 };
        let now = self.now();
        let mut drive = lock(&self.shared.drive);
        if pct == 0.0 {
            if drive.state.stepping {
                drive.halt(now).map_err(|e| self.hw(&e))?;
                drive.state.held = true;
            }
            drive.state.duty_cycle_pct = 0.0;
            return Ok(());
        }
        drive
            .generator
            .set_duty_cycle(pct / 100.0)
            .map_err(|e| self.hw(&e))?;
        drive.state.duty_cycle_pct = pct;
        if drive.state.held && drive.state.frequency_hz > 0.0 && !self.is_tripped() {
            drive.run(now).map_err(|e| self.hw(&e))?;
        }
        Ok(())
    }

    /// Set (`Some`) or toggle (`None`) the direction.
    ///
    /// While stepping, pulses are paused around the direction change so it
    /// never lands mid-pulse.
    pub fn reverse(&self, explicit: Option<bool>) -> crate::Result<()> {
        let now = self.now();
        let mut drive = lock(&self.shared.drive);
        let target = explicit.unwrap_or(!drive.state.reversed);
        if target == drive.state.reversed {
            return Ok(());
        }
        let resume = drive.state.stepping;
        if resume {
            drive.halt(now).map_err(|e| self.hw(&e))?;
        }
        drive
            .generator
            .set_direction(target)
            .map_err(|e| self.hw(&e))?;
        drive.state.reversed = target;
        if resume {
            drive.run(now).map_err(|e| self.hw(&e))?;
        }
        tracing::trace!(axis = %self.shared.name, reversed = target, "direction changed");
        Ok(())
    }

    /// Honour home switch edges again.
    pub fn enable_interrupts(&self) {
        self.shared.interrupts_enabled.store(true, Ordering::SeqCst);
    }

    /// Ignore home switch edges, e.g. while leaving the switch after homing.
    pub fn disable_interrupts(&self) {
        self.shared.interrupts_enabled.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn interrupts_enabled(&self) -> bool {
        self.shared.interrupts_enabled.load(Ordering::SeqCst)
    }

    /// True once a limit switch stopped the motor, until the next start/stop.
    #[must_use]
    pub fn is_tripped(&self) -> bool {
        self.shared.hit.load(Ordering::SeqCst) != HIT_NONE
    }

    #[must_use]
    pub fn hit(&self) -> Option<LimitSwitch> {
        match self.shared.hit.load(Ordering::SeqCst) {
            HIT_HOME => Some(LimitSwitch::Home),
            HIT_SAFETY => Some(LimitSwitch::Safety),
            _ => None,
        }
    }

    /// Forget a latched hit without touching the outputs.
    pub fn clear_hit(&self) {
        self.shared.hit.store(HIT_NONE, Ordering::SeqCst);
    }

    #[must_use]
    pub fn state(&self) -> MotorState {
        lock(&self.shared.drive).state
    }

    #[must_use]
    pub fn is_stepping(&self) -> bool {
        lock(&self.shared.drive).state.stepping
    }

    #[must_use]
    pub fn is_reversed(&self) -> bool {
        lock(&self.shared.drive).state.reversed
    }

    /// Approximate signed step count since the last reset. Debug telemetry.
    #[must_use]
    pub fn step_count(&self) -> i64 {
        let now = self.now();
        let drive = lock(&self.shared.drive);
        let running = drive.segment_start.map_or(0.0, |start| {
            let steps = now.saturating_duration_since(start).as_secs_f64() * drive.state.frequency_hz;
            if drive.state.reversed { -steps } else { steps }
        });
        #[allow(clippy::cast_possible_truncation)]
        let count = (drive.banked_steps + running).round() as i64;
        count
    }

    pub fn reset_step_count(&self) {
        let now = self.now();
        let mut drive = lock(&self.shared.drive);
        drive.banked_steps = 0.0;
        if drive.segment_start.is_some() {
            drive.segment_start = Some(now);
        }
    }

    #[must_use]
    pub fn has_home_switch(&self) -> bool {
        self.home.is_some()
    }

    /// Current level of the home switch, if one is fitted.
    #[must_use]
    pub fn home_asserted(&self) -> Option<bool> {
        self.home.as_ref().map(|s| s.is_asserted())
    }

    #[must_use]
    pub fn safety_asserted(&self) -> Option<bool> {
        self.safety.as_ref().map(|s| s.is_asserted())
    }

    #[must_use]
    pub fn calibration_state(&self) -> CalibrationState {
        *lock(&self.calibration)
    }

    pub(crate) fn set_calibration_state(&self, state: CalibrationState) {
        *lock(&self.calibration) = state;
    }

    pub(crate) fn clock(&self) -> &SharedClock {
        &self.shared.clock
    }

    /// Settle delay used when confirming switch edges.
    #[must_use]
    pub const fn switch_settle(&self) -> Duration {
        self.cfg.switch_settle
    }
}

impl Drop for MotorDriver {
    fn drop(&mut self) {
        self.shared.run_id.fetch_add(1, Ordering::SeqCst);
        let mut drive = lock(&self.shared.drive);
        if drive.state.stepping
            && let Err(e) = drive.halt(self.shared.clock.now())
        {
            tracing::warn!(axis = %self.shared.name, error = %e, "motor stop on drop failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plate_hardware::sim::{SimCommand, SimStepGenerator, SimSwitch};
    use plate_traits::test_clock::TestClock;

    fn driver(
        home: Option<SimSwitch>,
        safety: Option<SimSwitch>,
    ) -> (MotorDriver, SimStepGenerator, TestClock) {
        let clock = TestClock::new();
        let gen_ = SimStepGenerator::new();
        let cfg = MotorCfg {
            switch_settle: Duration::ZERO,
            ..MotorCfg::default()
        };
        let m = MotorDriver::new(
            "x",
            Box::new(gen_.clone()),
            home.map(|s| Arc::new(s) as Arc<dyn SwitchInput>),
            safety.map(|s| Arc::new(s) as Arc<dyn SwitchInput>),
            cfg,
            Arc::new(clock.clone()),
        )
        .unwrap();
        (m, gen_, clock)
    }

    fn wait_for(mut f: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if f() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn counts_steps_by_direction() {
        let (m, _g, clock) = driver(None, None);
        m.set_frequency(100.0).unwrap();
        m.start(None).unwrap();
        clock.advance(Duration::from_secs(2));
        assert_eq!(m.step_count(), 200);
        m.reverse(Some(true)).unwrap();
        clock.advance(Duration::from_millis(500));
        assert_eq!(m.step_count(), 150);
        m.stop().unwrap();
        clock.advance(Duration::from_secs(1));
        assert_eq!(m.step_count(), 150);
        m.reset_step_count();
        assert_eq!(m.step_count(), 0);
    }

    #[test]
    fn zero_frequency_holds_and_resumes() {
        let (m, g, _clock) = driver(None, None);
        m.set_frequency(300.0).unwrap();
        m.start(None).unwrap();
        m.set_frequency(0.0).unwrap();
        assert!(!g.is_running());
        assert!(m.state().held);
        m.set_frequency(250.0).unwrap();
        assert!(g.is_running());
        assert_eq!(g.frequency(), 250.0);
        assert!(!m.state().held);
    }

    #[test]
    fn zero_duty_holds_and_resumes() {
        let (m, g, _clock) = driver(None, None);
        m.start(None).unwrap();
        m.set_duty_cycle(0.0).unwrap();
        assert!(!g.is_running());
        m.set_duty_cycle(25.0).unwrap();
        assert!(g.is_running());
        assert_eq!(g.duty_cycle(), 0.25);
        assert_eq!(m.state().duty_cycle_pct, 25.0);
    }

    #[test]
    fn reverse_pauses_pulses_around_direction_change() {
        let (m, g, _clock) = driver(None, None);
        m.set_frequency(100.0).unwrap();
        m.start(None).unwrap();
        m.reverse(None).unwrap();
        assert!(m.is_reversed());
        assert_eq!(
            g.commands(),
            vec![
                SimCommand::Start(100.0),
                SimCommand::Stop,
                SimCommand::Direction(true),
                SimCommand::Start(100.0),
            ]
        );
        // no-op when already in the requested direction
        m.reverse(Some(true)).unwrap();
        assert_eq!(g.commands().len(), 4);
    }

    #[test]
    fn start_rejects_zero_frequency() {
        let (m, _g, _clock) = driver(None, None);
        m.set_frequency(0.0).unwrap();
        assert!(m.start(None).is_err());
    }

    #[test]
    fn safety_switch_stops_motor_and_latches() {
        let safety = SimSwitch::new();
        let (m, g, _clock) = driver(None, Some(safety.clone()));
        m.start(None).unwrap();
        safety.set_asserted(true);
        assert!(wait_for(|| m.is_tripped()));
        assert_eq!(m.hit(), Some(LimitSwitch::Safety));
        assert!(!g.is_running());
        // a tripped motor is not resumed by a speed command
        m.set_frequency(500.0).unwrap();
        assert!(!g.is_running());
        m.stop().unwrap();
        assert!(!m.is_tripped());
    }

    #[test]
    fn bounce_without_assertion_is_ignored() {
        let home = SimSwitch::new();
        let (m, g, _clock) = driver(Some(home.clone()), None);
        m.start(None).unwrap();
        home.glitch();
        std::thread::sleep(Duration::from_millis(50));
        assert!(!m.is_tripped());
        assert!(g.is_running());
    }

    #[test]
    fn masked_interrupts_ignore_home_but_not_safety() {
        let home = SimSwitch::new();
        let safety = SimSwitch::new();
        let (m, g, _clock) = driver(Some(home.clone()), Some(safety.clone()));
        m.disable_interrupts();
        m.start(None).unwrap();
        home.set_asserted(true);
        std::thread::sleep(Duration::from_millis(50));
        assert!(!m.is_tripped());
        assert!(g.is_running());

        safety.set_asserted(true);
        assert!(wait_for(|| m.hit() == Some(LimitSwitch::Safety)));
        assert!(!g.is_running());
    }

    #[test]
    fn counted_start_stops_after_duration() {
        let (m, g, _clock) = driver(None, None);
        m.set_frequency(1000.0).unwrap();
        // TestClock sleeps return immediately, so the timer fires at once
        m.start(Some(50)).unwrap();
        assert!(wait_for(|| !g.is_running()));
        assert!(!m.is_stepping());
    }
}
