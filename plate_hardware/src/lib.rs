//! Hardware backends for the plate positioning stack.
//!
//! - `sim`: a simulated axis (stepper, caliper, limit switches) used by tests
//!   and by `plate run --sim`.
//! - `camera`: still-capture backends.
//! - `gpio` (feature `hardware`, Linux only): Raspberry Pi implementations via rppal.
pub mod camera;
pub mod error;
pub mod sim;

#[cfg(all(feature = "hardware", target_os = "linux"))]
pub mod gpio;

pub use camera::{CommandCamera, NullCamera};
pub use error::HwError;
pub use sim::{SimAxis, SimAxisCfg, SimClockLine, SimOutput, SimStepGenerator, SimSwitch};
