//! Hardware assembly and the run / calibrate commands.

use crate::cli::{JSON_MODE, RtLock};
use crate::rt::setup_rt_once;
use eyre::{Result, WrapErr};
use plate_config::Config;
use plate_core::{AppContext, AxisHardware, PlateReport, SharedClock, TracingStatus};
use plate_hardware::SimAxis;
use plate_traits::{Camera, SwitchInput};
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Weak};

/// Start position override for simulated axes, in mm.
const SIM_START_ENV: &str = "PLATE_SIM_START_MM";

/// Everything that must outlive the run: the context plus the simulators it
/// borrows hardware from.
pub struct Machine {
    pub ctx: Arc<AppContext>,
    _sims: Vec<SimAxis>,
}

fn sim_hardware(sim: &SimAxis) -> AxisHardware {
    AxisHardware {
        stepper: Box::new(sim.stepper()),
        home: Some(Arc::new(sim.home_switch()) as Arc<dyn SwitchInput>),
        safety: Some(Arc::new(sim.safety_switch()) as Arc<dyn SwitchInput>),
        clock_line: Box::new(sim.clock_line()),
        zero_out: Box::new(sim.zero_output()),
    }
}

fn sim_start_mm() -> Result<Option<f64>> {
    match std::env::var(SIM_START_ENV) {
        Ok(v) => v
            .trim()
            .parse::<f64>()
            .map(Some)
            .wrap_err_with(|| format!("{SIM_START_ENV} must be a number, got {v:?}")),
        Err(_) => Ok(None),
    }
}

#[cfg(all(feature = "hardware", target_os = "linux"))]
fn gpio_hardware(pins: &plate_config::Pins) -> Result<AxisHardware> {
    use plate_hardware::gpio::{GpioClockLine, GpioOutput, GpioStepper, GpioSwitch};

    let switch = |pin: Option<u8>| -> Result<Option<Arc<dyn SwitchInput>>> {
        pin.map(|p| {
            GpioSwitch::new(p, pins.switch_active_low)
                .map(|s| Arc::new(s) as Arc<dyn SwitchInput>)
                .wrap_err_with(|| format!("open switch gpio {p}"))
        })
        .transpose()
    };
    Ok(AxisHardware {
        stepper: Box::new(GpioStepper::new(pins.step, pins.dir).wrap_err("open stepper gpio")?),
        home: switch(pins.home_switch)?,
        safety: switch(pins.safety_switch)?,
        clock_line: Box::new(
            GpioClockLine::new(pins.caliper_clock, pins.caliper_data)
                .wrap_err("open caliper gpio")?,
        ),
        zero_out: Box::new(GpioOutput::new(pins.caliper_zero).wrap_err("open caliper zero gpio")?),
    })
}

fn camera(cfg: &Config, sim: bool) -> Box<dyn Camera> {
    use plate_config::CameraBackend;
    use plate_hardware::{CommandCamera, NullCamera};

    let dir = cfg.camera.output_dir.clone();
    if sim {
        return Box::new(NullCamera::new(dir));
    }
    match (cfg.camera.backend, cfg.camera.program.as_deref()) {
        (CameraBackend::Libcamera, _) => Box::new(CommandCamera::libcamera(dir)),
        (CameraBackend::Command, Some(program)) => {
            Box::new(CommandCamera::new(dir, program, cfg.camera.args.clone()))
        }
        (CameraBackend::Command, None) | (CameraBackend::None, _) => Box::new(NullCamera::new(dir)),
    }
}

/// Build both axes and the plate context on simulated or GPIO hardware.
pub fn assemble(cfg: &mut Config, sim: bool) -> Result<Machine> {
    let clock: SharedClock = plate_core::monotonic();
    let stop = Arc::new(AtomicBool::new(false));

    let mut sims = Vec::new();
    let (hx, hy) = if sim {
        // simulated frames are clocked back to back
        cfg.axes.x.caliper.clock_bounce_us = 0;
        cfg.axes.y.caliper.clock_bounce_us = 0;
        let mut sim_cfg = plate_hardware::SimAxisCfg::default();
        if let Some(mm) = sim_start_mm()? {
            sim_cfg.start_mm = mm;
        }
        let (x, y) = (SimAxis::spawn(sim_cfg.clone()), SimAxis::spawn(sim_cfg));
        let hw = (sim_hardware(&x), sim_hardware(&y));
        sims.push(x);
        sims.push(y);
        tracing::info!("using simulated axes");
        hw
    } else {
        hardware_pair(cfg)?
    };

    let x = plate_core::build_axis("x", &cfg.axes.x, hx, clock.clone(), Arc::clone(&stop))
        .wrap_err("build axis x")?;
    let y = plate_core::build_axis("y", &cfg.axes.y, hy, clock.clone(), Arc::clone(&stop))
        .wrap_err("build axis y")?;

    let ctx = Arc::new(AppContext::new(
        x,
        y,
        camera(cfg, sim),
        Arc::new(TracingStatus),
        stop,
        (&cfg.runner).into(),
        clock,
    ));

    if !sim {
        arm_estop(cfg, &ctx)?;
    }

    Ok(Machine { ctx, _sims: sims })
}

#[cfg(all(feature = "hardware", target_os = "linux"))]
fn hardware_pair(cfg: &Config) -> Result<(AxisHardware, AxisHardware)> {
    Ok((gpio_hardware(&cfg.axes.x.pins)?, gpio_hardware(&cfg.axes.y.pins)?))
}

#[cfg(not(all(feature = "hardware", target_os = "linux")))]
fn hardware_pair(_cfg: &Config) -> Result<(AxisHardware, AxisHardware)> {
    eyre::bail!("built without GPIO support; rebuild with --features hardware or pass --sim")
}

/// The button latches the context: the run fails with `EmergencyStop` (exit 6).
#[cfg(all(feature = "hardware", target_os = "linux"))]
fn arm_estop(cfg: &Config, ctx: &Arc<AppContext>) -> Result<()> {
    let Some(pin) = cfg.estop.pin else {
        return Ok(());
    };
    let input = plate_hardware::gpio::GpioSwitch::new(pin, cfg.estop.active_low)
        .wrap_err_with(|| format!("open estop gpio {pin}"))?;
    ctx.arm_emergency_stop(
        Arc::new(input),
        std::time::Duration::from_millis(cfg.estop.settle_ms),
    )
    .wrap_err_with(|| format!("arm estop on gpio {pin}"))
}

#[cfg(not(all(feature = "hardware", target_os = "linux")))]
fn arm_estop(cfg: &Config, _ctx: &Arc<AppContext>) -> Result<()> {
    if cfg.estop.pin.is_some() {
        tracing::warn!("estop.pin is set but GPIO support is not built in; emergency stop disabled");
    }
    Ok(())
}

/// Ctrl-C stops both axes; the run then winds down and reports.
fn install_ctrlc(ctx: &Arc<AppContext>) -> Result<()> {
    let weak: Weak<AppContext> = Arc::downgrade(ctx);
    ctrlc::set_handler(move || {
        tracing::warn!("interrupt received, stopping");
        if let Some(ctx) = weak.upgrade() {
            ctx.stop_process();
        }
    })
    .wrap_err("install Ctrl-C handler")
}

fn json_mode() -> bool {
    JSON_MODE.get().copied().unwrap_or(false)
}

pub fn run_calibrate(cfg: &mut Config, sim: bool) -> Result<()> {
    let machine = assemble(cfg, sim)?;
    install_ctrlc(&machine.ctx)?;
    machine.ctx.initialise()?;
    if json_mode() {
        println!("{}", serde_json::json!({ "calibrated": true }));
    } else {
        println!("Calibrated: both axes homed and calipers zeroed");
    }
    Ok(())
}

pub struct RunArgs<'a> {
    pub setpoints: &'a Path,
    pub sim: bool,
    pub rt: bool,
    pub rt_prio: Option<i32>,
    pub rt_lock: Option<RtLock>,
}

pub fn run_plate(cfg: &mut Config, args: &RunArgs<'_>) -> Result<PlateReport> {
    let wells = plate_config::setpoints::load_setpoints_csv(args.setpoints)
        .wrap_err_with(|| format!("load setpoints from {}", args.setpoints.display()))?;

    setup_rt_once(args.rt, args.rt_prio, args.rt_lock.unwrap_or_else(RtLock::os_default));

    let machine = assemble(cfg, args.sim)?;
    install_ctrlc(&machine.ctx)?;
    machine.ctx.initialise()?;
    let report = machine.ctx.run_plate(&wells)?;
    print_report(&report, wells.len());
    Ok(report)
}

fn print_report(report: &PlateReport, planned: usize) {
    if json_mode() {
        let photos: Vec<String> = report
            .photos
            .iter()
            .map(|p| p.display().to_string())
            .collect();
        println!(
            "{}",
            serde_json::json!({
                "wells_planned": planned,
                "wells_completed": report.wells_completed,
                "stopped": report.stopped,
                "photos": photos,
            })
        );
    } else if report.stopped {
        println!(
            "Plate run stopped: {} of {planned} wells complete",
            report.wells_completed
        );
    } else {
        println!("Plate run complete: {} wells", report.wells_completed);
    }
}
