//! Status values reported by the axis control loop and the plate runner.

use crate::error::AxisError;
use plate_traits::StatusSink;
use std::path::Path;

/// Public status of a single control loop iteration.
#[derive(Debug, Clone, PartialEq)]
pub enum AxisStatus {
    /// Keep going; not settled yet.
    Running,
    /// Inside the error band for the full settling time; motor already stopped.
    Settled,
    /// Aborted with a typed error; motor has been asked to stop.
    Aborted(AxisError),
}

/// How a move ended.
#[derive(Debug, Clone, PartialEq)]
pub enum MoveOutcome {
    Settled(MoveReport),
    /// Ended by `stop()` or the process-wide stop flag.
    Stopped,
}

/// Summary of a completed move.
#[derive(Debug, Clone, PartialEq)]
pub struct MoveReport {
    pub setpoint_mm: f64,
    pub final_position_mm: f64,
    pub elapsed_s: f64,
    pub readings: u32,
    pub rejected: u32,
}

/// Status sink that only logs; used when no operator display is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingStatus;

impl StatusSink for TracingStatus {
    fn update_status(&self, text: &str) {
        tracing::info!(target: "plate::status", "{text}");
    }

    fn update_image(&self, path: &Path) {
        tracing::info!(target: "plate::status", image = %path.display(), "image captured");
    }
}
