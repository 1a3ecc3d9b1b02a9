#![allow(dead_code)]
//! Shared rigs for the threaded plate_core tests.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use plate_core::mocks::RecordingStatus;
use plate_core::{AppContext, AxisController, AxisHardware, RunnerCfg, build_axis, monotonic};
use plate_hardware::{NullCamera, SimAxis, SimAxisCfg};
use plate_traits::SwitchInput;

/// Both axes, zero clock bounce (the simulator clocks bits back to back).
pub const CONFIG: &str = r#"
[axes.x.pins]
step = 1
dir = 2
home_switch = 3
safety_switch = 4
caliper_clock = 5
caliper_data = 6
caliper_zero = 7

[axes.x.motor]
default_hz = 400.0
calibration_timeout_ms = 5000
switch_settle_ms = 5

[axes.x.pid]
kp = 200.0

[axes.x.control]
min_hz = 20.0
max_hz = 2000.0
error_margin_mm = 0.1
settling_ms = 300
interrupt_ignore_ms = 500
read_timeout_ms = 1000

[axes.x.caliper]
clock_bounce_us = 0
pause_ms = 50

[axes.y.pins]
step = 11
dir = 12
home_switch = 13
safety_switch = 14
caliper_clock = 15
caliper_data = 16
caliper_zero = 17

[axes.y.motor]
default_hz = 400.0
calibration_timeout_ms = 5000
switch_settle_ms = 5

[axes.y.pid]
kp = 200.0

[axes.y.control]
min_hz = 20.0
max_hz = 2000.0
error_margin_mm = 0.1
settling_ms = 300
read_timeout_ms = 1000

[axes.y.caliper]
clock_bounce_us = 0
pause_ms = 50
"#;

pub fn config() -> plate_config::Config {
    let cfg = plate_config::load_toml(CONFIG).expect("test config parses");
    cfg.validate().expect("test config is valid");
    cfg
}

pub fn hardware(sim: &SimAxis) -> AxisHardware {
    AxisHardware {
        stepper: Box::new(sim.stepper()),
        home: Some(Arc::new(sim.home_switch()) as Arc<dyn SwitchInput>),
        safety: Some(Arc::new(sim.safety_switch()) as Arc<dyn SwitchInput>),
        clock_line: Box::new(sim.clock_line()),
        zero_out: Box::new(sim.zero_output()),
    }
}

pub fn sim_at(start_mm: f64) -> SimAxisCfg {
    SimAxisCfg {
        start_mm,
        ..SimAxisCfg::default()
    }
}

pub struct Rig {
    pub ctx: Arc<AppContext>,
    pub status: RecordingStatus,
    pub x: SimAxis,
    pub y: SimAxis,
}

pub fn rig(x: SimAxisCfg, y: SimAxisCfg) -> Rig {
    rig_with(&config(), x, y)
}

pub fn rig_with(cfg: &plate_config::Config, x: SimAxisCfg, y: SimAxisCfg) -> Rig {
    let (x, y) = (SimAxis::spawn(x), SimAxis::spawn(y));
    let clock = monotonic();
    let stop = Arc::new(AtomicBool::new(false));
    let ax = build_axis("x", &cfg.axes.x, hardware(&x), clock.clone(), Arc::clone(&stop))
        .expect("x axis builds");
    let ay = build_axis("y", &cfg.axes.y, hardware(&y), clock.clone(), Arc::clone(&stop))
        .expect("y axis builds");
    let status = RecordingStatus::new();
    let ctx = Arc::new(AppContext::new(
        ax,
        ay,
        Box::new(NullCamera::new("pics")),
        Arc::new(status.clone()),
        stop,
        RunnerCfg {
            pause_poll: Duration::from_millis(20),
            capture_samples: true,
        },
        clock,
    ));
    Rig { ctx, status, x, y }
}

pub fn single_axis(cfg: &plate_config::AxisConfig, hw: AxisHardware) -> AxisController {
    build_axis(
        "x",
        cfg,
        hw,
        monotonic(),
        Arc::new(AtomicBool::new(false)),
    )
    .expect("axis builds")
}

/// Poll `cond` every 5 ms for up to `limit`.
pub fn wait_for(limit: Duration, cond: impl Fn() -> bool) -> bool {
    let deadline = std::time::Instant::now() + limit;
    while std::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}
