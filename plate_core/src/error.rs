use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AxisError {
    #[error("axis {axis}: timeout waiting for caliper reading")]
    SensorTimeout { axis: String },
    #[error("axis {axis}: {switch} limit switch tripped during motion")]
    SafetyLimitTripped { axis: String, switch: String },
    #[error("axis {axis}: calibration timed out before the home switch was reached")]
    CalibrationTimeout { axis: String },
    #[error("axis {axis}: no home switch configured")]
    NoSwitchConfigured { axis: String },
    #[error("emergency stop asserted")]
    EmergencyStop,
    #[error("process stopped by operator")]
    Stopped,
    #[error("hardware error: {0}")]
    Hardware(String),
    #[error("hardware fault: {0}")]
    HardwareFault(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("invalid state: {0}")]
    State(String),
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("missing motor driver")]
    MissingMotor,
    #[error("missing caliper")]
    MissingCaliper,
    #[error("missing PID gains")]
    MissingPid,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
