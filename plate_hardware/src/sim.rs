//! Simulated axis hardware.
//!
//! `SimAxis` owns a physics thread that integrates the commanded step
//! frequency into a carriage position, asserts the home/far-end switches at the
//! travel limits and transmits the caliper position as 24-bit frames through a
//! `SimClockLine`. The individual parts are cheap clones sharing state, so tests
//! can hand one copy to the controller and keep another for inspection.
use plate_traits::{BitSink, BoxError, ClockLine, DigitalOutput, EdgeSink, StepGenerator, SwitchInput};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Largest magnitude a caliper frame can carry (20 bits of hundredths of a millimetre).
pub const MAX_FRAME_MAGNITUDE: u32 = 0x000F_FFFF;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

/// Encode a position in millimetres into the 24 bits a caliper transmits,
/// in arrival order.
///
/// Bit layout after reversing arrival order: bits 0..3 unused, bit 3 sign,
/// bits 4..24 magnitude in hundredths of a millimetre, most significant first.
pub fn encode_frame(mm: f64) -> [bool; 24] {
    let magnitude = ((mm.abs() * 100.0).round() as u64).min(u64::from(MAX_FRAME_MAGNITUDE)) as u32;
    let mut wire = [false; 24];
    wire[3] = mm < 0.0 && magnitude != 0;
    for i in 0..20 {
        wire[4 + i] = (magnitude >> (19 - i)) & 1 == 1;
    }
    wire.reverse();
    wire
}

/// One command received by a `SimStepGenerator`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SimCommand {
    Start(f64),
    SetFrequency(f64),
    DutyCycle(f64),
    Stop,
    Direction(bool),
}

#[derive(Debug)]
struct StepperState {
    running: bool,
    hz: f64,
    duty: f64,
    reversed: bool,
    commands: Vec<SimCommand>,
}

impl Default for StepperState {
    fn default() -> Self {
        Self {
            running: false,
            hz: 0.0,
            duty: 0.5,
            reversed: false,
            commands: Vec::new(),
        }
    }
}

/// Step generator that records its commands and exposes the live output state.
#[derive(Debug, Clone, Default)]
pub struct SimStepGenerator {
    state: Arc<Mutex<StepperState>>,
}

impl SimStepGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        lock(&self.state).running
    }

    pub fn frequency(&self) -> f64 {
        lock(&self.state).hz
    }

    pub fn is_reversed(&self) -> bool {
        lock(&self.state).reversed
    }

    pub fn duty_cycle(&self) -> f64 {
        lock(&self.state).duty
    }

    /// Snapshot of every command issued so far.
    pub fn commands(&self) -> Vec<SimCommand> {
        lock(&self.state).commands.clone()
    }

    /// Signed steps per second the outputs are currently producing.
    fn velocity_sps(&self) -> f64 {
        let s = lock(&self.state);
        match (s.running && s.duty > 0.0, s.reversed) {
            (false, _) => 0.0,
            (true, false) => s.hz,
            (true, true) => -s.hz,
        }
    }
}

impl StepGenerator for SimStepGenerator {
    fn start(&mut self, hz: f64) -> Result<(), BoxError> {
        let mut s = lock(&self.state);
        s.running = true;
        s.hz = hz;
        s.commands.push(SimCommand::Start(hz));
        Ok(())
    }

    fn set_frequency(&mut self, hz: f64) -> Result<(), BoxError> {
        let mut s = lock(&self.state);
        s.hz = hz;
        s.commands.push(SimCommand::SetFrequency(hz));
        Ok(())
    }

    fn set_duty_cycle(&mut self, duty: f64) -> Result<(), BoxError> {
        let mut s = lock(&self.state);
        s.duty = duty;
        s.commands.push(SimCommand::DutyCycle(duty));
        Ok(())
    }

    fn stop(&mut self) -> Result<(), BoxError> {
        let mut s = lock(&self.state);
        s.running = false;
        s.commands.push(SimCommand::Stop);
        Ok(())
    }

    fn set_direction(&mut self, reversed: bool) -> Result<(), BoxError> {
        let mut s = lock(&self.state);
        s.reversed = reversed;
        s.commands.push(SimCommand::Direction(reversed));
        Ok(())
    }
}

#[derive(Default)]
struct SwitchInner {
    level: AtomicBool,
    sink: Mutex<Option<EdgeSink>>,
}

/// Limit switch or e-stop input driven by tests or the physics thread.
#[derive(Clone, Default)]
pub struct SimSwitch {
    inner: Arc<SwitchInner>,
}

impl core::fmt::Debug for SimSwitch {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SimSwitch")
            .field("asserted", &self.inner.level.load(Ordering::Relaxed))
            .finish()
    }
}

impl SimSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the switch level; a low-to-high transition fires the subscribed sink.
    pub fn set_asserted(&self, asserted: bool) {
        let was = self.inner.level.swap(asserted, Ordering::SeqCst);
        if asserted && !was {
            if let Some(sink) = lock(&self.inner.sink).as_mut() {
                sink();
            }
        }
    }

    /// Fire the rising-edge sink without changing the level (contact bounce).
    pub fn glitch(&self) {
        if let Some(sink) = lock(&self.inner.sink).as_mut() {
            sink();
        }
    }
}

impl SwitchInput for SimSwitch {
    fn is_asserted(&self) -> bool {
        self.inner.level.load(Ordering::SeqCst)
    }

    fn subscribe(&self, sink: EdgeSink) -> Result<(), BoxError> {
        *lock(&self.inner.sink) = Some(sink);
        Ok(())
    }

    fn unsubscribe(&self) -> Result<(), BoxError> {
        *lock(&self.inner.sink) = None;
        Ok(())
    }
}

/// Caliper clock line; frames are pushed bit by bit into the subscribed sink.
#[derive(Clone, Default)]
pub struct SimClockLine {
    sink: Arc<Mutex<Option<BitSink>>>,
}

impl SimClockLine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_subscribed(&self) -> bool {
        lock(&self.sink).is_some()
    }

    /// Clock out `bits` back to back. Returns false when nobody is listening.
    pub fn emit_bits(&self, bits: &[bool]) -> bool {
        let mut guard = lock(&self.sink);
        match guard.as_mut() {
            Some(sink) => {
                for &b in bits {
                    sink(b);
                }
                true
            }
            None => false,
        }
    }

    /// Clock out one complete frame carrying `mm`.
    pub fn emit_position(&self, mm: f64) -> bool {
        self.emit_bits(&encode_frame(mm))
    }
}

impl ClockLine for SimClockLine {
    fn subscribe(&self, sink: BitSink) -> Result<(), BoxError> {
        *lock(&self.sink) = Some(sink);
        Ok(())
    }

    fn unsubscribe(&self) -> Result<(), BoxError> {
        *lock(&self.sink) = None;
        Ok(())
    }
}

/// Digital output whose level can be observed.
#[derive(Debug, Clone, Default)]
pub struct SimOutput {
    level: Arc<AtomicBool>,
    pulses: Arc<AtomicU32>,
}

impl SimOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_high(&self) -> bool {
        self.level.load(Ordering::SeqCst)
    }

    /// Number of low-to-high transitions seen so far.
    pub fn pulse_count(&self) -> u32 {
        self.pulses.load(Ordering::SeqCst)
    }
}

impl DigitalOutput for SimOutput {
    fn set_high(&mut self) -> Result<(), BoxError> {
        if !self.level.swap(true, Ordering::SeqCst) {
            self.pulses.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn set_low(&mut self) -> Result<(), BoxError> {
        self.level.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Physical parameters of a simulated axis.
#[derive(Debug, Clone)]
pub struct SimAxisCfg {
    /// Carriage travel per step.
    pub mm_per_step: f64,
    /// Initial carriage position (absolute, home switch at `home_mm`).
    pub start_mm: f64,
    /// Home switch is asserted at or below this position.
    pub home_mm: f64,
    /// Far-end safety switch is asserted at or above this position.
    pub travel_mm: f64,
    /// Interval between caliper frames.
    pub frame_period: Duration,
    /// Physics integration step.
    pub tick: Duration,
    /// Every n-th frame carries a corrupted reading (`None` disables).
    pub glitch_every: Option<u32>,
}

impl Default for SimAxisCfg {
    fn default() -> Self {
        Self {
            mm_per_step: 0.01,
            start_mm: 20.0,
            home_mm: 0.0,
            travel_mm: 130.0,
            frame_period: Duration::from_millis(20),
            tick: Duration::from_millis(2),
            glitch_every: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Carriage {
    position_mm: f64,
    origin_mm: f64,
}

/// A running simulated axis. Dropping it stops the physics thread.
pub struct SimAxis {
    stepper: SimStepGenerator,
    home: SimSwitch,
    safety: SimSwitch,
    clock_line: SimClockLine,
    zero: SimOutput,
    carriage: Arc<Mutex<Carriage>>,
    shutdown: Arc<AtomicBool>,
    join_handle: Option<JoinHandle<()>>,
}

impl SimAxis {
    pub fn spawn(cfg: SimAxisCfg) -> Self {
        let stepper = SimStepGenerator::new();
        let home = SimSwitch::new();
        let safety = SimSwitch::new();
        let clock_line = SimClockLine::new();
        let zero = SimOutput::new();
        let carriage = Arc::new(Mutex::new(Carriage {
            position_mm: cfg.start_mm,
            origin_mm: 0.0,
        }));
        let shutdown = Arc::new(AtomicBool::new(false));

        let join_handle = {
            let stepper = stepper.clone();
            let home = home.clone();
            let safety = safety.clone();
            let clock_line = clock_line.clone();
            let zero = zero.clone();
            let carriage = carriage.clone();
            let shutdown = shutdown.clone();
            std::thread::spawn(move || {
                let mut last_tick = Instant::now();
                let mut last_frame = Instant::now();
                let mut frames: u32 = 0;
                while !shutdown.load(Ordering::Relaxed) {
                    std::thread::sleep(cfg.tick);
                    let now = Instant::now();
                    let dt = now.saturating_duration_since(last_tick).as_secs_f64();
                    last_tick = now;

                    let (pos, reading) = {
                        let mut c = lock(&carriage);
                        c.position_mm += stepper.velocity_sps() * dt * cfg.mm_per_step;
                        // Hard mechanical stops just beyond the switches.
                        c.position_mm = c.position_mm.clamp(cfg.home_mm - 1.0, cfg.travel_mm + 1.0);
                        if zero.is_high() {
                            c.origin_mm = c.position_mm;
                        }
                        (c.position_mm, c.position_mm - c.origin_mm)
                    };
                    home.set_asserted(pos <= cfg.home_mm);
                    safety.set_asserted(pos >= cfg.travel_mm);

                    if now.saturating_duration_since(last_frame) >= cfg.frame_period {
                        last_frame = now;
                        frames = frames.wrapping_add(1);
                        let glitch = cfg.glitch_every.is_some_and(|n| n > 0 && frames % n == 0);
                        let mm = if glitch { reading + 50.0 } else { reading };
                        clock_line.emit_position(mm);
                    }
                }
                tracing::trace!("sim axis thread exiting");
            })
        };

        Self {
            stepper,
            home,
            safety,
            clock_line,
            zero,
            carriage,
            shutdown,
            join_handle: Some(join_handle),
        }
    }

    pub fn stepper(&self) -> SimStepGenerator {
        self.stepper.clone()
    }

    pub fn home_switch(&self) -> SimSwitch {
        self.home.clone()
    }

    pub fn safety_switch(&self) -> SimSwitch {
        self.safety.clone()
    }

    pub fn clock_line(&self) -> SimClockLine {
        self.clock_line.clone()
    }

    pub fn zero_output(&self) -> SimOutput {
        self.zero.clone()
    }

    /// Absolute carriage position.
    pub fn position_mm(&self) -> f64 {
        lock(&self.carriage).position_mm
    }

    /// Position as the caliper reports it (relative to the last zeroing).
    pub fn caliper_mm(&self) -> f64 {
        let c = lock(&self.carriage);
        c.position_mm - c.origin_mm
    }
}

impl Drop for SimAxis {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.join_handle.take() {
            if let Err(e) = handle.join() {
                tracing::warn!(?e, "sim axis thread panicked during shutdown");
            }
        }
    }
}
