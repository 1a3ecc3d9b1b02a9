mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{config, rig, rig_with, sim_at, wait_for};
use plate_config::Setpoint;
use plate_core::{AxisError, CalibrationResult, CalibrationState};
use plate_hardware::{SimAxisCfg, SimSwitch};

#[test]
fn two_wells_end_to_end() {
    let r = rig(sim_at(0.0), sim_at(0.0));
    r.ctx.initialise().expect("initialise");

    let wells = [Setpoint::new(0.0, 0.0), Setpoint::new(13.0, 0.0)];
    let report = r.ctx.run_plate(&wells).expect("plate run");

    assert_eq!(report.wells_completed, 2);
    assert!(!report.stopped);
    let names: Vec<String> = report
        .photos
        .iter()
        .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .collect();
    assert_eq!(names, ["well_000.jpg", "well_001.jpg"]);
    assert_eq!(r.status.images(), report.photos);

    assert!((r.x.caliper_mm() - 13.0).abs() < 0.2, "x at {}", r.x.caliper_mm());
    assert!(r.y.caliper_mm().abs() < 0.2, "y at {}", r.y.caliper_mm());

    let samples = r.ctx.x().samples();
    assert!(!samples.is_empty());
    assert!(samples.windows(2).all(|w| w[0].0 <= w[1].0));
    let (_, last) = samples[samples.len() - 1];
    assert!((last - 13.0).abs() < 0.1);

    // nothing left running once the plate is done
    assert!(!r.x.stepper().is_running());
    assert!(!r.ctx.x().is_running());
    assert_eq!(r.ctx.x().setpoint(), None);
}

#[test]
fn homes_and_zeroes_both_axes() {
    let r = rig(sim_at(2.0), sim_at(1.0));
    r.ctx.initialise().expect("initialise");

    for axis in [r.ctx.x(), r.ctx.y()] {
        assert_eq!(
            axis.motor().calibration_state(),
            CalibrationState::Done(CalibrationResult::Calibrated)
        );
        assert_eq!(axis.motor().step_count(), 0);
        assert!(!axis.motor().is_stepping());
    }
    assert!(r.x.position_mm() <= 0.0);
    assert!(r.x.caliper_mm().abs() < 1e-9);
    assert_eq!(r.x.zero_output().pulse_count(), 1);
    assert!(r.status.texts().iter().any(|t| t == "Calibrated"));
}

#[test]
fn calibration_timeout_is_reported() {
    let mut cfg = config();
    cfg.axes.x.motor.calibration_timeout_ms = 200;
    let r = rig_with(&cfg, sim_at(50.0), sim_at(0.0));

    let err = r.ctx.initialise().unwrap_err();
    assert!(matches!(
        err.downcast_ref::<AxisError>(),
        Some(AxisError::CalibrationTimeout { axis }) if axis == "x"
    ));
    assert!(!r.x.stepper().is_running());
    assert!(r.status.texts().iter().any(|t| t.contains("timed out")));
}

#[test]
fn safety_trip_stops_both_axes() {
    let x = SimAxisCfg {
        travel_mm: 20.0,
        ..sim_at(0.0)
    };
    let r = rig(x, sim_at(0.0));
    r.ctx.initialise().expect("initialise");

    let wells = [Setpoint::new(0.0, 0.0), Setpoint::new(50.0, 0.0)];
    let err = r.ctx.run_plate(&wells).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<AxisError>(),
        Some(AxisError::SafetyLimitTripped { axis, switch }) if axis == "x" && switch == "safety"
    ));

    assert!(r.ctx.stop_flag().load(Ordering::SeqCst));
    assert!(!r.x.stepper().is_running());
    assert!(!r.y.stepper().is_running());
    assert!(r.status.texts().iter().any(|t| t.starts_with("SAFETY")));
    // the first well was photographed before the fault
    assert_eq!(r.status.images().len(), 1);
}

#[test]
fn operator_stop_ends_run_early() {
    let r = rig(sim_at(0.0), sim_at(0.0));
    r.ctx.initialise().expect("initialise");

    let wells = [
        Setpoint::new(0.0, 0.0),
        Setpoint::new(100.0, 0.0),
        Setpoint::new(0.0, 0.0),
    ];
    let report = std::thread::scope(|s| {
        let run = s.spawn(|| r.ctx.run_plate(&wells));
        assert!(wait_for(Duration::from_secs(10), || r.x.stepper().is_running()));
        r.ctx.stop_process();
        run.join().expect("run thread")
    })
    .expect("stopped run is not an error");

    assert!(report.stopped);
    assert_eq!(report.wells_completed, 1);
    assert!(!r.x.stepper().is_running());
    // cleared so the next run can start
    assert!(!r.ctx.stop_flag().load(Ordering::SeqCst));
}

#[test]
fn emergency_stop_aborts_the_run_and_stays_latched() {
    let r = rig(sim_at(0.0), sim_at(0.0));
    let button = SimSwitch::new();
    r.ctx
        .arm_emergency_stop(Arc::new(button.clone()), Duration::from_millis(10))
        .expect("arm");
    r.ctx.initialise().expect("initialise");

    let wells = [
        Setpoint::new(0.0, 0.0),
        Setpoint::new(100.0, 0.0),
        Setpoint::new(0.0, 0.0),
    ];
    let err = std::thread::scope(|s| {
        let run = s.spawn(|| r.ctx.run_plate(&wells));
        assert!(wait_for(Duration::from_secs(10), || {
            r.status.images().len() == 1 && r.x.stepper().is_running()
        }));
        button.set_asserted(true);
        run.join().expect("run thread")
    })
    .unwrap_err();

    assert_eq!(err.downcast_ref::<AxisError>(), Some(&AxisError::EmergencyStop));
    assert!(r.ctx.is_emergency_stopped());
    assert!(r.ctx.stop_flag().load(Ordering::SeqCst));
    assert!(!r.x.stepper().is_running());
    assert!(!r.y.stepper().is_running());
    assert_eq!(r.status.images().len(), 1);
    assert!(r.status.texts().iter().any(|t| t.starts_with("EMERGENCY STOP")));

    // still pressed: nothing may move and the latch will not clear
    let x_before = r.x.position_mm();
    let again = r.ctx.run_plate(&wells[..1]).unwrap_err();
    assert_eq!(again.downcast_ref::<AxisError>(), Some(&AxisError::EmergencyStop));
    let homing = r.ctx.initialise().unwrap_err();
    assert_eq!(homing.downcast_ref::<AxisError>(), Some(&AxisError::EmergencyStop));
    assert!((r.x.position_mm() - x_before).abs() < 1e-9);
    let rearm = r.ctx.rearm_emergency_stop().unwrap_err();
    assert_eq!(rearm.downcast_ref::<AxisError>(), Some(&AxisError::EmergencyStop));
    assert!(r.ctx.is_emergency_stopped());

    button.set_asserted(false);
    r.ctx.rearm_emergency_stop().expect("rearm after release");
    assert!(!r.ctx.is_emergency_stopped());
    assert!(!r.ctx.stop_flag().load(Ordering::SeqCst));
}

#[test]
fn y_failing_to_start_winds_x_down() {
    let r = rig(sim_at(0.0), sim_at(0.0));
    r.ctx.y().start(100.0, false, false).expect("y busy");

    let err = r.ctx.run_plate(&[Setpoint::new(50.0, 0.0)]).unwrap_err();
    assert!(matches!(err.downcast_ref::<AxisError>(), Some(AxisError::State(_))));
    // x was started, stopped and collected
    assert!(!r.ctx.x().is_running());
    assert!(!r.x.stepper().is_running());
    assert!(wait_for(Duration::from_secs(5), || !r.ctx.y().is_running()));
    assert!(!r.y.stepper().is_running());
}

#[test]
fn pause_toggles_and_is_announced() {
    let r = rig(sim_at(0.0), sim_at(0.0));
    assert!(!r.ctx.is_paused());
    assert!(r.ctx.toggle_pause());
    assert!(r.ctx.is_paused());
    assert!(!r.ctx.toggle_pause());
    let texts = r.status.texts();
    assert!(texts.contains(&"Paused".to_string()));
    assert!(texts.contains(&"Resumed".to_string()));
}
