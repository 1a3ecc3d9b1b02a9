#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Axis motion control for the plate positioner (hardware-agnostic).
//!
//! All hardware goes through the seams in `plate_traits`; the simulated
//! backend in `plate_hardware::sim` drives the same code in tests.
//!
//! ## Architecture
//!
//! - **Decoding**: caliper clock edges to 24-bit frames to millimetres (`decoder`)
//! - **Filtering**: median outlier rejection (`filter`)
//! - **Caliper**: interrupt-side pipeline plus the non-blocking reading handoff (`caliper`)
//! - **Motor**: step generation, direction, limit switch cutoff (`motor`), homing (`calibration`)
//! - **Control**: PID and settle detection driving one axis to a setpoint (`axis`)
//! - **Process**: homing both axes and visiting every well (`process`), emergency stop (`estop`)
//!
//! ## Threads
//!
//! Interrupt sinks never block: switch edges are confirmed on a watcher
//! thread, caliper readings are handed off through a capacity-1 channel that
//! drops the oldest value. Each move runs its control loop on its own thread.

pub mod axis;
pub mod builder;
pub mod calibration;
pub mod caliper;
pub mod config;
pub mod conversions;
pub mod decoder;
pub mod error;
pub mod estop;
pub mod filter;
pub mod hw_error;
pub mod mocks;
pub mod motor;
pub mod pid;
pub mod process;
pub mod settle;
pub mod status;
pub mod util;

mod watch;

pub use axis::{AxisController, ControlLoop};
pub use builder::{AxisBuilder, AxisHardware, build_axis};
pub use calibration::{CalibrationResult, CalibrationState};
pub use caliper::{Caliper, CaliperStats, Reading};
pub use config::{CaliperCfg, ControlCfg, DecoderCfg, FilterCfg, MotorCfg, PidGains, RunnerCfg};
pub use error::{AxisError, BuildError, Report, Result};
pub use estop::EmergencyStop;
pub use filter::OutlierFilter;
pub use motor::{LimitSwitch, MotorDriver, MotorState};
pub use pid::Pid;
pub use process::{AppContext, PlateReport};
pub use settle::{SettleTracker, Settling};
pub use status::{AxisStatus, MoveOutcome, MoveReport, TracingStatus};
pub use util::{SharedClock, monotonic};
