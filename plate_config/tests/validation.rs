use plate_config::{CameraBackend, load_toml};
use rstest::rstest;

const AXES: &str = r#"
[axes.x.pins]
step = 18
dir = 23
home_switch = 5
safety_switch = 6
caliper_clock = 17
caliper_data = 27
caliper_zero = 22

[axes.x.pid]
kp = 200.0

[axes.y.pins]
step = 13
dir = 24
home_switch = 16
caliper_clock = 20
caliper_data = 21
caliper_zero = 26

[axes.y.pid]
kp = 180.0
ki = 1.5
"#;

fn with(extra: &str) -> String {
    format!("{AXES}\n{extra}")
}

#[test]
fn minimal_config_gets_defaults() {
    let cfg = load_toml(AXES).expect("parse TOML");
    cfg.validate().expect("valid config should pass");

    let x = &cfg.axes.x;
    assert_eq!(x.pins.home_switch, Some(5));
    assert_eq!(cfg.axes.y.pins.safety_switch, None);
    assert!((x.motor.default_hz - 400.0).abs() < f64::EPSILON);
    assert_eq!(x.control.settling_ms, 300);
    assert_eq!(x.filter.window, 5);
    assert_eq!(x.caliper.pause_ms, 50);
    assert_eq!(cfg.camera.backend, CameraBackend::Libcamera);
    assert_eq!(cfg.runner.pause_poll_ms, 500);
    assert!(cfg.estop.pin.is_none());
}

#[test]
fn missing_pid_is_a_parse_error() {
    let toml = AXES.replace("[axes.y.pid]\nkp = 180.0\nki = 1.5\n", "");
    assert!(load_toml(&toml).is_err());
}

#[rstest]
#[case("[axes.x.control]\nmin_hz = 0.0", "axes.x.control.min_hz must be > 0")]
#[case("[axes.y.control]\nmin_hz = 500.0\nmax_hz = 100.0", "axes.y.control.max_hz must be >= min_hz")]
#[case("[axes.x.control]\nerror_margin_mm = 0.0", "error_margin_mm must be > 0")]
#[case("[axes.x.filter]\nwindow = 0", "axes.x.filter.window must be >= 1")]
#[case("[axes.x.filter]\nmax_error_mm = -1.0", "filter.max_error_mm must be > 0")]
#[case("[axes.x.caliper]\npause_ms = 0", "caliper.pause_ms must be >= 1")]
#[case("[axes.x.caliper]\nclock_bounce_us = 60000", "clock_bounce_us must be shorter than pause_ms")]
#[case("[axes.x.control]\nread_timeout_ms = 20", "read_timeout_ms must exceed caliper.pause_ms")]
#[case("[axes.y.motor]\ncalibration_timeout_ms = 0", "axes.y.motor.calibration_timeout_ms must be >= 1")]
#[case("[camera]\nbackend = \"command\"", "camera.program is required")]
#[case("[logging]\nrotation = \"weekly\"", "logging.rotation must be one of never|daily|hourly")]
#[case("[runner]\npause_poll_ms = 0", "runner.pause_poll_ms must be >= 1")]
fn rejects_invalid_values(#[case] extra: &str, #[case] expected: &str) {
    let cfg = load_toml(&with(extra)).expect("parse TOML");
    let err = cfg.validate().expect_err("should be rejected");
    assert!(
        format!("{err}").contains(expected),
        "unexpected error: {err}"
    );
}

#[test]
fn accepts_command_camera_with_program() {
    let cfg = load_toml(&with(
        r#"
[camera]
backend = "command"
program = "fswebcam"
args = ["{path}"]
output_dir = "/tmp/plate"
"#,
    ))
    .expect("parse TOML");
    cfg.validate().expect("valid config should pass");
    assert_eq!(cfg.camera.args, vec!["{path}".to_string()]);
}

#[test]
fn sample_config_in_etc_is_valid() {
    let s = std::fs::read_to_string(concat!(env!("CARGO_MANIFEST_DIR"), "/../etc/plate_config.toml"))
        .expect("read etc/plate_config.toml");
    let cfg = load_toml(&s).expect("parse TOML");
    cfg.validate().expect("shipped config should pass");
}
