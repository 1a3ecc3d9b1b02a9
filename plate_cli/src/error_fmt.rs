//! Human-readable error descriptions and structured JSON error formatting.

use plate_core::error::{AxisError, BuildError};

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingMotor => {
                "What happened: No motor driver was provided to the axis.\nLikely causes: The stepper failed to initialize or was not wired into the builder.\nHow to fix: Ensure the stepper is created successfully and passed via with_motor(...).".to_string()
            }
            BuildError::MissingCaliper => {
                "What happened: No caliper was provided to the axis.\nLikely causes: The caliper pins failed to initialize or were not wired into the builder.\nHow to fix: Ensure the caliper is created successfully and passed via with_caliper(...).".to_string()
            }
            BuildError::MissingPid => {
                "What happened: PID gains were not set.\nLikely causes: The [axes.*.pid] table is missing or was not passed to the builder.\nHow to fix: Add kp/ki/kd under [axes.x.pid] and [axes.y.pid].".to_string()
            }
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Missing or out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun. See etc/plate_config.toml for a sample."
            ),
        };
    }

    if let Some(ae) = err.downcast_ref::<AxisError>() {
        return match ae {
            AxisError::SafetyLimitTripped { axis, switch } => format!(
                "What happened: The {switch} limit switch on axis {axis} tripped during motion.\nLikely causes: A setpoint beyond the travel range, a wrong setpoint_offset_mm, or a caliper that lost its zero.\nHow to fix: Check the setpoint file and the axis offset, jog the carriage off the switch, then start a new run."
            ),
            AxisError::SensorTimeout { axis } => format!(
                "What happened: The caliper on axis {axis} stopped sending readings.\nLikely causes: Caliper battery flat, loose clock/data wiring, or the caliper switched itself off.\nHow to fix: Check [axes.{axis}.pins] caliper_clock/caliper_data and the caliper power; consider raising control.read_timeout_ms."
            ),
            AxisError::CalibrationTimeout { axis } => format!(
                "What happened: Axis {axis} did not reach its home switch in time.\nLikely causes: Home switch not wired, motor not moving, or home_reversed pointing away from the switch.\nHow to fix: Verify the home switch and stepper wiring, check motor.home_reversed, or raise motor.calibration_timeout_ms."
            ),
            AxisError::NoSwitchConfigured { axis } => format!(
                "What happened: Axis {axis} has no home switch, so it cannot be homed.\nLikely causes: pins.home_switch is missing for this axis.\nHow to fix: Set [axes.{axis}.pins] home_switch to the switch GPIO."
            ),
            AxisError::EmergencyStop => {
                "What happened: Emergency stop was triggered.\nLikely causes: E-stop button pressed or input pin active.\nHow to fix: Release E-stop, ensure wiring is correct, then start a new run.".to_string()
            }
            AxisError::Stopped => {
                "What happened: The run was stopped by the operator.\nLikely causes: Ctrl-C or a stop request.\nHow to fix: Start a new run when ready.".to_string()
            }
            other => format!(
                "What happened: {other}.\nLikely causes: See logs.\nHow to fix: Re-run with --log-level=debug or set RUST_LOG for more detail."
            ),
        };
    }

    // String-based heuristics for errors coming from init or config
    let msg = format!("{err:#}");
    let lower = msg.to_ascii_lowercase();

    if lower.contains("gpio") {
        return format!(
            "What happened: Failed to initialize hardware pins.\nLikely causes: Incorrect pin numbers or insufficient GPIO permissions.\nHow to fix: Fix the [axes.*.pins] values in the config; ensure the process has permission to access GPIO. Original: {msg}"
        );
    }

    if lower.contains("config") {
        return format!(
            "What happened: Configuration is invalid or incomplete.\nLikely causes: A missing table, an unknown key, or an out-of-range value.\nHow to fix: Edit the TOML config and try again. Original: {msg}"
        );
    }

    if lower.contains("setpoint") {
        return format!(
            "What happened: The setpoint file could not be used.\nLikely causes: A row without two numbers, or a wrong path.\nHow to fix: Use one `x_mm, y_mm` pair per line (see generate-setpoints). Original: {msg}"
        );
    }

    // Generic fallback
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Stable name of the error kind, used as the JSON `reason`.
pub fn reason_name(err: &eyre::Report) -> &'static str {
    match err.downcast_ref::<AxisError>() {
        Some(AxisError::SafetyLimitTripped { .. }) => "SafetyLimitTripped",
        Some(AxisError::SensorTimeout { .. }) => "SensorTimeout",
        Some(AxisError::CalibrationTimeout { .. }) => "CalibrationTimeout",
        Some(AxisError::NoSwitchConfigured { .. }) => "NoSwitchConfigured",
        Some(AxisError::EmergencyStop) => "EmergencyStop",
        Some(AxisError::Stopped) => "Stopped",
        Some(AxisError::Hardware(_) | AxisError::HardwareFault(_)) => "Hardware",
        Some(AxisError::Config(_)) => "Config",
        Some(AxisError::State(_)) => "State",
        None if err.downcast_ref::<BuildError>().is_some() => "Build",
        None => "Error",
    }
}

/// Map error kinds to stable exit codes; anything untyped returns 1.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    match err.downcast_ref::<AxisError>() {
        Some(AxisError::SafetyLimitTripped { .. }) => 2,
        Some(AxisError::SensorTimeout { .. }) => 3,
        Some(AxisError::CalibrationTimeout { .. }) => 4,
        Some(AxisError::NoSwitchConfigured { .. }) => 5,
        Some(AxisError::EmergencyStop | AxisError::Stopped) => 6,
        _ => 1,
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    use serde_json::json;

    let msg = humanize(err);
    let reason = reason_name(err);
    let details = match err.downcast_ref::<AxisError>() {
        Some(AxisError::SafetyLimitTripped { axis, switch }) => {
            Some(json!({ "axis": axis, "switch": switch }))
        }
        Some(
            AxisError::SensorTimeout { axis }
            | AxisError::CalibrationTimeout { axis }
            | AxisError::NoSwitchConfigured { axis },
        ) => Some(json!({ "axis": axis })),
        _ => None,
    };

    let obj = if let Some(d) = details {
        json!({ "reason": reason, "details": d, "message": msg })
    } else {
        json!({ "reason": reason, "message": msg })
    };
    obj.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn axis(kind: &str) -> AxisError {
        let axis = "x".to_string();
        match kind {
            "safety" => AxisError::SafetyLimitTripped {
                axis,
                switch: "safety".into(),
            },
            "sensor" => AxisError::SensorTimeout { axis },
            "calibration" => AxisError::CalibrationTimeout { axis },
            "no_switch" => AxisError::NoSwitchConfigured { axis },
            "estop" => AxisError::EmergencyStop,
            "stopped" => AxisError::Stopped,
            _ => AxisError::Hardware("gpio 17 busy".into()),
        }
    }

    #[rstest]
    #[case("safety", 2, "SafetyLimitTripped")]
    #[case("sensor", 3, "SensorTimeout")]
    #[case("calibration", 4, "CalibrationTimeout")]
    #[case("no_switch", 5, "NoSwitchConfigured")]
    #[case("estop", 6, "EmergencyStop")]
    #[case("stopped", 6, "Stopped")]
    #[case("hardware", 1, "Hardware")]
    fn exit_codes_and_reasons(#[case] kind: &str, #[case] code: i32, #[case] reason: &str) {
        let err = eyre::Report::new(axis(kind));
        assert_eq!(exit_code_for_error(&err), code);
        let v: serde_json::Value = serde_json::from_str(&format_error_json(&err)).unwrap();
        assert_eq!(v["reason"], reason);
        assert!(v["message"].as_str().unwrap().contains("What happened"));
    }

    #[test]
    fn wrapped_axis_error_keeps_its_code() {
        use eyre::WrapErr;
        let err = Err::<(), _>(axis("sensor"))
            .wrap_err("plate run failed")
            .unwrap_err();
        assert_eq!(exit_code_for_error(&err), 3);
        assert!(humanize(&err).contains("caliper on axis x"));
    }

    #[test]
    fn safety_details_name_the_switch() {
        let err = eyre::Report::new(axis("safety"));
        let v: serde_json::Value = serde_json::from_str(&format_error_json(&err)).unwrap();
        assert_eq!(v["details"]["axis"], "x");
        assert_eq!(v["details"]["switch"], "safety");
    }

    #[test]
    fn untyped_errors_fall_back() {
        let err = eyre::eyre!("something odd");
        assert_eq!(exit_code_for_error(&err), 1);
        assert_eq!(reason_name(&err), "Error");
        assert!(humanize(&err).contains("something odd"));
    }
}
