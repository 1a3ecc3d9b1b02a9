mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{config, hardware, sim_at, single_axis, wait_for};
use plate_core::{AxisError, AxisHardware, MoveOutcome};
use plate_hardware::{SimAxis, SimClockLine, SimOutput, SimStepGenerator, SimSwitch};
use plate_traits::SwitchInput;

fn silent_hardware(stepper: &SimStepGenerator) -> AxisHardware {
    AxisHardware {
        stepper: Box::new(stepper.clone()),
        home: Some(Arc::new(SimSwitch::new()) as Arc<dyn SwitchInput>),
        safety: None,
        clock_line: Box::new(SimClockLine::new()),
        zero_out: Box::new(SimOutput::new()),
    }
}

#[test]
fn silent_caliper_is_a_sensor_timeout() {
    let cfg = config();
    let stepper = SimStepGenerator::new();
    let axis = single_axis(&cfg.axes.x, silent_hardware(&stepper));

    let t0 = Instant::now();
    axis.start(5.0, false, false).unwrap();
    let err = axis.wait_until_finished().unwrap_err();
    assert!(matches!(
        err.downcast_ref::<AxisError>(),
        Some(AxisError::SensorTimeout { axis }) if axis == "x"
    ));
    assert!(t0.elapsed() >= Duration::from_millis(900));
    assert!(!stepper.is_running());
    assert!(!axis.caliper().is_listening());
}

#[test]
fn persistent_rejection_is_a_sensor_timeout() {
    let mut cfg = config();
    // strict median filter: a window of zeros never admits 50 mm
    cfg.axes.x.filter.reseed_after = 0;
    let sim = SimAxis::spawn(sim_at(50.0));
    let axis = single_axis(&cfg.axes.x, hardware(&sim));

    let t0 = Instant::now();
    axis.start(10.0, false, false).unwrap();
    assert!(
        wait_for(Duration::from_secs(4), || !axis.is_running()),
        "move still holding after 4 s of rejected readings"
    );
    let err = axis.wait_until_finished().unwrap_err();
    assert!(matches!(
        err.downcast_ref::<AxisError>(),
        Some(AxisError::SensorTimeout { axis }) if axis == "x"
    ));
    assert!(t0.elapsed() >= Duration::from_millis(900));
    assert!(axis.caliper().stats().rejected > 0);
    assert!(!sim.stepper().is_running());
    assert!(!axis.motor().is_stepping());
}

#[test]
fn stop_mid_move_returns_stopped() {
    let cfg = config();
    let sim = SimAxis::spawn(sim_at(0.5));
    let axis = single_axis(&cfg.axes.x, hardware(&sim));

    axis.start(100.0, false, false).unwrap();
    assert!(wait_for(Duration::from_secs(5), || sim.stepper().is_running()));
    assert_eq!(axis.setpoint(), Some(100.0));

    axis.stop().unwrap();
    axis.stop().unwrap();
    assert_eq!(axis.wait_until_finished().unwrap(), MoveOutcome::Stopped);
    assert!(!sim.stepper().is_running());
    assert_eq!(axis.setpoint(), None);
    assert!(!axis.is_running());

    // idle axis: nothing to wait for
    assert_eq!(axis.wait_until_finished().unwrap(), MoveOutcome::Stopped);
}

#[test]
fn offset_applies_and_samples_are_captured() {
    let mut cfg = config();
    cfg.axes.x.control.setpoint_offset_mm = 3.0;
    let sim = SimAxis::spawn(sim_at(0.5));
    let axis = single_axis(&cfg.axes.x, hardware(&sim));

    axis.start(2.0, true, false).unwrap();
    let MoveOutcome::Settled(report) = axis.wait_until_finished().unwrap() else {
        panic!("move did not settle");
    };
    assert!((report.setpoint_mm - 5.0).abs() < 1e-12);
    assert!((report.final_position_mm - 5.0).abs() < 0.1);
    assert!(report.readings > 0);
    assert!((sim.caliper_mm() - 5.0).abs() < 0.2);

    let samples = axis.samples();
    assert!(samples.len() > 3);
    assert!(samples.windows(2).all(|w| w[0].0 <= w[1].0));
    assert!(!axis.motor().is_stepping());
}

#[test]
fn second_start_while_running_is_rejected() {
    let cfg = config();
    let sim = SimAxis::spawn(sim_at(0.5));
    let axis = single_axis(&cfg.axes.x, hardware(&sim));

    axis.start(80.0, false, false).unwrap();
    let err = axis.start(10.0, false, false).unwrap_err();
    assert!(matches!(err.downcast_ref::<AxisError>(), Some(AxisError::State(_))));
    axis.stop().unwrap();
    assert_eq!(axis.wait_until_finished().unwrap(), MoveOutcome::Stopped);
}

#[test]
fn non_finite_setpoint_is_rejected() {
    let cfg = config();
    let stepper = SimStepGenerator::new();
    let axis = single_axis(&cfg.axes.x, silent_hardware(&stepper));
    let err = axis.start(f64::NAN, false, false).unwrap_err();
    assert!(matches!(err.downcast_ref::<AxisError>(), Some(AxisError::Config(_))));
    assert!(!axis.is_running());
}
